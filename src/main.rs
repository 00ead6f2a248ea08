fn main() {
    normal_pipeline::cli::run();
}
