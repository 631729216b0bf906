use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gate-cli")]
#[command(about = "Management CLI for the request defense gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GATE_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway status and request counters
    Status,
    /// Show lockout state of an identity
    Lockout { identity: String },
    /// Clear lockout state and history of an identity
    Unlock { identity: String },
    /// Show throttle state of an IP
    Ip { ip: String },
    /// Block an IP for a number of minutes
    Block {
        ip: String,
        #[arg(short, long, default_value_t = 60)]
        minutes: u64,
    },
    /// Lift every block on an IP
    Unblock { ip: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let call = |method: Method, path: String| -> RequestBuilder {
        client
            .request(method, format!("{}{}", cli.url, path))
            .headers(headers.clone())
    };

    let request = match cli.command {
        Commands::Status => call(Method::GET, "/admin/status".into()),
        Commands::Lockout { identity } => call(Method::GET, format!("/admin/lockouts/{identity}")),
        Commands::Unlock { identity } => {
            call(Method::DELETE, format!("/admin/lockouts/{identity}"))
        }
        Commands::Ip { ip } => call(Method::GET, format!("/admin/ips/{ip}")),
        Commands::Block { ip, minutes } => call(Method::POST, format!("/admin/ips/{ip}/block"))
            .json(&json!({ "minutes": minutes })),
        Commands::Unblock { ip } => call(Method::DELETE, format!("/admin/ips/{ip}")),
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
