use formpilot_browser::BrowserSupervisor;
use formpilot_core::{Config, Paths};

use super::gateway::build_orchestrator;

/// Run full environment diagnostics.
pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("🩺 formpilot doctor: environment diagnostics");
    println!("================================");
    println!();

    let mut ok_count = 0u32;
    let mut warn_count = 0u32;
    let mut err_count = 0u32;

    // --- 1. Config ---
    println!("📋 Configuration");
    if paths.config_file().exists() {
        print_ok("Config file exists", &paths.config_file().display().to_string());
        ok_count += 1;
    } else {
        print_warn("Config file not found", "Run `formpilot init` to create one (defaults in use)");
        warn_count += 1;
    }

    let config = match Config::load_or_default(&paths) {
        Ok(config) => config,
        Err(e) => {
            print_err("Config file could not be parsed", &e.to_string());
            err_count += 1;
            print_summary(ok_count, warn_count, err_count);
            return Ok(());
        }
    };

    if config.api_token().is_some() {
        print_ok("API token set", "/v1 routes require a Bearer token");
        ok_count += 1;
    } else {
        print_warn("No server.apiToken", "/v1 routes are open to anyone who can reach the port");
        warn_count += 1;
    }
    println!("  Listen: {}:{}", config.server.host, config.server.port);
    println!();

    // --- 2. Browser ---
    println!("🌐 Browser");
    if let Some(url) = &config.browser.attach_url {
        print_ok("Attaching to running browser", url);
        ok_count += 1;
    } else {
        let supervisor = BrowserSupervisor::new(&config.browser, &paths);
        match supervisor.locate_executable() {
            Ok(path) => {
                print_ok("Browser executable", &path);
                ok_count += 1;
            }
            Err(e) => {
                print_err("No browser executable", &e.to_string());
                err_count += 1;
            }
        }
    }
    println!(
        "  Attach: up to {} polls every {} ms",
        config.browser.max_attempts, config.browser.poll_interval_ms
    );
    println!();

    // --- 3. Automation engine ---
    println!("🤖 Automation engine");
    match config.engine.endpoint() {
        Some(endpoint) => {
            print_ok("Endpoint", &endpoint);
            ok_count += 1;
        }
        None => {
            print_err("No engine endpoint", "Set engine.endpoint in config.json");
            err_count += 1;
        }
    }
    if config.engine.resolved_api_key().is_some() {
        print_ok("API key configured", "");
        ok_count += 1;
    } else {
        print_err(
            "No engine API key",
            &format!("Set engine.apiKey or the {} environment variable", config.engine.api_key_env),
        );
        err_count += 1;
    }

    // Probes the engine and the browser lookup the same way `/health` does.
    let report = build_orchestrator(&config, &paths).health().await;
    if report.engine.configured {
        if report.engine.reachable {
            print_ok("Engine reachable", &report.engine.detail);
            ok_count += 1;
        } else {
            print_err("Engine unreachable", &report.engine.detail);
            err_count += 1;
        }
    }
    println!("  Model: {}", config.engine.model);
    match config.engine.run_timeout_secs {
        0 => println!("  Run timeout: none"),
        secs => println!("  Run timeout: {}s", secs),
    }
    println!();

    // --- 4. Readiness ---
    println!("✅ Readiness");
    if report.ready {
        print_ok("Gateway ready to accept jobs", "");
        ok_count += 1;
    } else {
        for problem in report.problems() {
            print_warn("Not ready", &problem);
            warn_count += 1;
        }
    }

    print_summary(ok_count, warn_count, err_count);
    Ok(())
}

fn print_summary(ok: u32, warn: u32, err: u32) {
    println!();
    println!("================================");
    println!("✅ {} passed  ⚠️  {} warnings  ❌ {} errors", ok, warn, err);
    println!();
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ✅ {}", label);
    } else {
        println!("  ✅ {}: {}", label, detail);
    }
}

fn print_warn(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ⚠️  {}", label);
    } else {
        println!("  ⚠️  {}: {}", label, hint);
    }
}

fn print_err(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ❌ {}", label);
    } else {
        println!("  ❌ {}: {}", label, hint);
    }
}
