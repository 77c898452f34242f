//! dropyard process entry point: CLI flags, config reset, janitor spawn.

use std::path::PathBuf;

use dropyard::{server::ServerConfig, run_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = PathBuf::from("config.json");
    let mut upload_dir: Option<PathBuf> = None;
    let mut reset = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--reset" | "-r" => reset = true,
            "--config" => {
                i += 1;
                if let Some(path) = args.get(i) {
                    config_path = PathBuf::from(path);
                }
            }
            "--upload-dir" => {
                i += 1;
                if let Some(path) = args.get(i) {
                    upload_dir = Some(PathBuf::from(path));
                }
            }
            _ => {}
        }
        i += 1;
    }

    if reset {
        dropyard::config::reset(&config_path).await?;
        println!("config reset to defaults at {}", config_path.display());
        return Ok(());
    }

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    run_server(ServerConfig {
        host: "0.0.0.0".to_string(),
        port,
        config_path,
        upload_dir,
    })
    .await
}
