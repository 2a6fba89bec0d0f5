use anyhow::Result;

fn main() -> Result<()> {
    let code = runguard::cli::run()?;
    std::process::exit(code)
}
