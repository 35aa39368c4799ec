use clap::{Parser, Subcommand, ValueEnum};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Admin CLI for the traffic gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// List services with per-instance stats
    Services {
        /// Show a single service
        name: Option<String>,
    },
    /// List circuit breaker stats
    Circuits,
    /// Force a circuit open, closed, or reset it
    Circuit {
        service: String,
        #[arg(value_enum)]
        action: CircuitAction,
    },
    /// Override an instance's health
    Instance {
        service: String,
        id: String,
        #[arg(value_enum)]
        health: InstanceHealth,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CircuitAction {
    Open,
    Close,
    Reset,
}

impl CircuitAction {
    fn as_str(self) -> &'static str {
        match self {
            CircuitAction::Open => "open",
            CircuitAction::Close => "close",
            CircuitAction::Reset => "reset",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum InstanceHealth {
    Healthy,
    Unhealthy,
}

impl InstanceHealth {
    fn as_str(self) -> &'static str {
        match self {
            InstanceHealth::Healthy => "healthy",
            InstanceHealth::Unhealthy => "unhealthy",
        }
    }
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

    let base = cli.url.trim_end_matches('/');
    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Services { name: None } => client.get(format!("{base}/admin/services")),
        Commands::Services { name: Some(name) } => {
            client.get(format!("{base}/admin/services/{name}"))
        }
        Commands::Circuits => client.get(format!("{base}/admin/circuits")),
        Commands::Circuit { service, action } => {
            client.post(format!("{base}/admin/circuits/{service}/{}", action.as_str()))
        }
        Commands::Instance {
            service,
            id,
            health,
        } => client.post(format!(
            "{base}/admin/services/{service}/instances/{id}/{}",
            health.as_str()
        )),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Response: {}", text);
            }
        }
        std::process::exit(1);
    }

    if status == StatusCode::NO_CONTENT {
        println!("OK");
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
