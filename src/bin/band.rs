use gridmul::engine::Algorithm;

fn main() {
    gridmul::cli::main(Algorithm::Band);
}
