use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser)]
#[command(name = "broker-cli")]
#[command(about = "Client CLI for the socket broker", long_about = None)]
struct Cli {
    /// Broker base URL.
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Bearer credential sent to the auth endpoint.
    #[arg(short, long)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request credentials from the auth endpoint
    Token {
        #[arg(long, default_value = "/nes/auth")]
        endpoint: String,
    },
    /// Connect, subscribe and print everything the broker sends
    Listen {
        /// Socket endpoint path.
        #[arg(long, default_value = "/")]
        path: String,

        /// Sealed token for the hello frame (token mode).
        #[arg(long)]
        token: Option<String>,

        /// Topics to subscribe to.
        #[arg(short, long = "sub")]
        subs: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Token { endpoint } => {
            let mut headers = HeaderMap::new();
            if let Some(key) = &cli.key {
                headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", key))?);
            }
            let res = reqwest::Client::new()
                .post(format!("{}{}", cli.url, endpoint))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Listen { path, token, subs } => {
            let ws_url = format!("{}{}", cli.url.replacen("http", "ws", 1), path);
            listen(&ws_url, token, cli.key, subs).await?;
        }
    }

    Ok(())
}

async fn listen(
    url: &str,
    token: Option<String>,
    key: Option<String>,
    subs: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (socket, _) = connect_async(url).await?;
    let (mut sink, mut stream) = socket.split();

    let auth = match (token, key) {
        (Some(token), _) => json!(token),
        (None, Some(key)) => json!({ "authorization": format!("Bearer {}", key) }),
        (None, None) => Value::Null,
    };
    let hello = json!({ "type": "hello", "id": 1, "version": "2", "auth": auth, "subs": subs });
    sink.send(Message::text(hello.to_string())).await?;

    let mut chunks = String::new();
    while let Some(message) = stream.next().await {
        let text = match message? {
            Message::Text(text) => text.to_string(),
            Message::Close(frame) => {
                eprintln!("Closed: {:?}", frame);
                break;
            }
            _ => continue,
        };

        // Reassemble `+`-prefixed chunks until the `!` terminator.
        let frame = match text.chars().next() {
            Some('+') => {
                chunks.push_str(&text[1..]);
                continue;
            }
            Some('!') => {
                chunks.push_str(&text[1..]);
                std::mem::take(&mut chunks)
            }
            _ => text,
        };

        let value: Value = serde_json::from_str(&frame)?;
        if value["type"] == "ping" {
            sink.send(Message::text(json!({ "type": "ping" }).to_string())).await?;
            continue;
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if let Some(cookie) = res.headers().get(reqwest::header::SET_COOKIE) {
        println!("Set-Cookie: {}", cookie.to_str()?);
    }
    if !status.is_success() {
        eprintln!("Error: auth endpoint returned status {}", status);
    }
    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
