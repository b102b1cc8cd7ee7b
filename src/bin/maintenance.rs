use leadbooth::{Config, expire_sessions, init_tracing};

fn print_usage(bin_name: &str) {
    eprintln!("Usage: {bin_name} expire-sessions");
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let mut args = std::env::args();
    let bin_name = args.next().unwrap_or_else(|| "leadbooth-maintenance".to_string());
    let command = args.next();

    if command.as_deref() != Some("expire-sessions") || args.next().is_some() {
        print_usage(&bin_name);
        std::process::exit(2);
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging.level, config.logging.json_format);

    match expire_sessions(&config).await {
        Ok(result) => {
            println!("Session expiry completed: sessions_expired={}", result.sessions_expired);
        }
        Err(err) => {
            eprintln!("Maintenance job failed: {err}");
            std::process::exit(1);
        }
    }
}
