use clap::{Parser, Subcommand};
use serde_json::Value;

use soap_proxy::TraceEntry;

#[derive(Parser)]
#[command(name = "trace-cli")]
#[command(about = "Inspect traces recorded by the SOAP proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the traces held in memory, oldest first
    List {
        /// Print the full JSON instead of one line per trace
        #[arg(long)]
        json: bool,
    },
    /// Show one trace
    Get { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::List { json } => {
            let res = client.get(format!("{}/traces", base)).send().await?;
            if !check_status(&res) {
                return print_error(res).await;
            }
            let traces: Vec<TraceEntry> = res.json().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&traces)?);
            } else {
                for trace in &traces {
                    println!("{}", summary_line(trace));
                }
            }
        }
        Commands::Get { id } => {
            let res = client.get(format!("{}/traces/{}", base, id)).send().await?;
            if !check_status(&res) {
                return print_error(res).await;
            }
            let json: Value = res.json().await?;
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }

    Ok(())
}

fn check_status(res: &reqwest::Response) -> bool {
    res.status().is_success()
}

async fn print_error(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Error: trace API returned status {}", res.status());
    if let Ok(text) = res.text().await {
        eprintln!("Response: {}", text);
    }
    Ok(())
}

fn summary_line(trace: &TraceEntry) -> String {
    let status = match (&trace.error, trace.status_code) {
        (Some(error), _) => format!("ERR {}", error),
        (None, Some(code)) => code.to_string(),
        (None, None) => "-".to_string(),
    };
    format!(
        "{}  {}  {:>6}ms  {:<24}  {} {}  {}",
        trace.started_at.to_rfc3339(),
        trace.id,
        trace.duration_ms,
        trace.soap_action,
        trace.method,
        trace.path,
        status
    )
}
