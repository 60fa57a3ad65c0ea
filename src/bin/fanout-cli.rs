use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(name = "fanout-cli")]
#[command(about = "fanoutd RPC client", long_about = None)]
struct Args {
    /// RPC server address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:8081")]
    rpc_addr: String,

    /// Output compact JSON (single line)
    #[arg(long)]
    compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "lowercase")]
enum Commands {
    /// Broadcast a JSON payload to every connection (heartbeat if omitted)
    Broadcast {
        /// JSON payload, e.g. '{"message":"hi"}'
        payload: Option<String>,
    },

    /// List registered connections
    ListConnections,

    /// Number of registered connections
    GetConnectionCount,

    /// Daemon uptime in seconds
    Uptime,
}

#[derive(Serialize, Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    id: String,
    method: String,
    params: Value,
}

#[derive(Serialize, Deserialize, Debug)]
struct RpcResponse {
    jsonrpc: String,
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize, Deserialize, Debug)]
struct RpcError {
    code: i32,
    message: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run_command(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_command(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let (method, params) = match &args.command {
        Commands::Broadcast { payload: Some(raw) } => {
            let payload: Value = serde_json::from_str(raw)?;
            ("broadcast", json!([payload]))
        }
        Commands::Broadcast { payload: None } => ("broadcast", json!([])),
        Commands::ListConnections => ("listconnections", json!([])),
        Commands::GetConnectionCount => ("getconnectioncount", json!([])),
        Commands::Uptime => ("uptime", json!([])),
    };

    let request = RpcRequest {
        jsonrpc: "2.0".to_string(),
        id: "fanout-cli".to_string(),
        method: method.to_string(),
        params,
    };

    let response = post(&args.rpc_addr, &request).await?;

    if let Some(error) = response.error {
        return Err(format!("RPC error {}: {}", error.code, error.message).into());
    }

    let result = response.result.unwrap_or(Value::Null);
    if args.compact {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}

async fn post(addr: &str, request: &RpcRequest) -> Result<RpcResponse, Box<dyn std::error::Error>> {
    let body = serde_json::to_string(request)?;
    let http_request = format!(
        "POST / HTTP/1.1\r\n\
         Host: {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        addr,
        body.len(),
        body
    );

    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(http_request.as_bytes()).await?;
    stream.flush().await?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    let text = String::from_utf8_lossy(&raw);

    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .ok_or("Malformed HTTP response")?;

    Ok(serde_json::from_str(body)?)
}
