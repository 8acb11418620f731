use gridmul::engine::Algorithm;

fn main() {
    gridmul::cli::main(Algorithm::Summa);
}
