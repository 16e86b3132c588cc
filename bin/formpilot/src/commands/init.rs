use formpilot_core::{Config, Paths};
use std::io::{self, Write};
use std::path::PathBuf;

pub async fn run(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();

    if paths.config_file().exists() && !force {
        print!("Config already exists. Overwrite? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    let config_path = write_default_config(&paths)?;
    println!("✓ Created config: {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set engine.endpoint in {}", config_path.display());
    println!("  2. Export GEMINI_API_KEY (or set engine.apiKey)");
    println!("  3. Run `formpilot doctor` to verify the setup");
    println!("  4. Run `formpilot serve` to start the gateway");

    Ok(())
}

fn write_default_config(paths: &Paths) -> anyhow::Result<PathBuf> {
    paths.ensure_dirs()?;
    let config_path = paths.config_file();
    Config::default().save(&config_path)?;
    Ok(config_path)
}
