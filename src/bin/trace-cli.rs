use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "trace-cli")]
#[command(about = "Browse traffic captured by traffic-capture", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Route prefix the inspection surface is mounted under.
    #[arg(short, long, default_value = "/traffic")]
    prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Most recent traces, newest first
    Latest {
        #[arg(short, long)]
        max: Option<usize>,
    },
    /// Every stored trace, oldest first
    List,
    /// Oldest trace
    First,
    /// Newest trace
    Last,
    /// Trace following the given ID
    Next { id: String },
    /// Trace preceding the given ID
    Prev { id: String },
    /// A single trace by ID
    Show { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = format!("{}{}", cli.url.trim_end_matches('/'), cli.prefix);

    let request = match &cli.command {
        Commands::Latest { max } => {
            let request = client.get(&base);
            match max {
                Some(max) => request.query(&[("max", max)]),
                None => request,
            }
        }
        Commands::List => client.get(format!("{base}/all")),
        Commands::First => client.get(format!("{base}/first")),
        Commands::Last => client.get(format!("{base}/last")),
        Commands::Next { id } => client.get(format!("{base}/{id}/next")),
        Commands::Prev { id } => client.get(format!("{base}/{id}/prev")),
        Commands::Show { id } => client.get(format!("{base}/{id}")),
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let is_json = res
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Response: {}", strip_tags(&text));
        return Err(format!("inspection API returned status {status}").into());
    }

    if is_json {
        let json: Value = serde_json::from_str(&text)?;
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("{}", strip_tags(&text));
    }
    Ok(())
}

/// Reduce an HTML fragment to readable text.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
