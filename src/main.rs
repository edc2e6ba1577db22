fn main() -> anyhow::Result<()> {
    dragon_congress::cli_main::main()
}
