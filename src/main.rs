fn main() {
    aqfetch::cli::run();
}
