//! Result line formatting (CSV).

use crate::engine::RunReport;
use crate::error::Result;
use std::io::Write;

/// Write the single result line of a run.
///
/// Format:
/// ```csv
/// N,processCount,nodeLabel,elapsedSeconds,check_equal=YES|NO
/// 256,4,1,0.012345,check_equal=YES
/// ```
pub fn write_result_line<W: Write>(report: &RunReport, writer: &mut W) -> Result<()> {
    writeln!(
        writer,
        "{},{},{},{:.6},check_equal={}",
        report.n,
        report.num_ranks,
        report.nodes,
        report.elapsed,
        if report.check_equal { "YES" } else { "NO" }
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Algorithm;

    fn report(check_equal: bool) -> RunReport {
        RunReport {
            algorithm: Algorithm::Cannon,
            n: 256,
            num_ranks: 4,
            nodes: "2".into(),
            grid: (2, 2),
            elapsed: 0.0123456789,
            check_equal,
            max_abs_error: 0.0,
            first_mismatch: None,
            phases: Vec::new(),
        }
    }

    #[test]
    fn formats_six_decimals() {
        let mut out = Vec::new();
        write_result_line(&report(true), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "256,4,2,0.012346,check_equal=YES\n");
    }

    #[test]
    fn mismatch_prints_no() {
        let mut out = Vec::new();
        write_result_line(&report(false), &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with(",check_equal=NO\n"));
    }
}
