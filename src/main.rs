fn main() -> anyhow::Result<()> {
    blogpad::cli::run()
}
