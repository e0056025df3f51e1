use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chatgate")]
#[command(about = "Chatgate CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config, session directory).
    Init {
        /// Config file path (default: CHATGATE_CONFIG_PATH or ~/.chatgate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway: keeps the chat-network session alive and serves the HTTP API.
    Gateway {
        /// Config file path (default: CHATGATE_CONFIG_PATH or ~/.chatgate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from PORT, config, or 3000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print the connection status of a running gateway.
    Status {
        /// Config file path (default: CHATGATE_CONFIG_PATH or ~/.chatgate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Send a text message through a running gateway.
    Send {
        /// Config file path (default: CHATGATE_CONFIG_PATH or ~/.chatgate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Recipient phone number (digits, optional +) or full address
        #[arg(long)]
        phone: String,

        /// Message text
        #[arg(long, short)]
        message: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("chatgate {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Status { config }) => {
            if let Err(e) = run_status(config).await {
                log::error!("status failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Send {
            config,
            phone,
            message,
        }) => {
            if let Err(e) = run_send(config, phone, message).await {
                log::error!("send failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = lib::config::load_config(config_path)?;
    let dir = lib::init::init_config_dir(&path, &config)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        std::env::remove_var("PORT");
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{}",
        config.gateway.bind,
        lib::config::resolve_gateway_port(&config)
    );
    lib::gateway::run_gateway(config, path).await
}

/// Base URL and bearer token for talking to the gateway described by the config.
struct GatewayClient {
    base: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl GatewayClient {
    fn from_config(config_path: Option<std::path::PathBuf>) -> anyhow::Result<Self> {
        let (config, _) = lib::config::load_config(config_path)?;
        let bind = config.gateway.bind.trim();
        let host = if bind == "0.0.0.0" || bind == "::" {
            "127.0.0.1"
        } else {
            bind
        };
        let token = if config.gateway.auth.mode == lib::config::GatewayAuthMode::Token {
            lib::config::resolve_gateway_token(&config)
        } else {
            None
        };
        Ok(Self {
            base: format!("http://{}:{}", host, lib::config::resolve_gateway_port(&config)),
            token,
            http: reqwest::Client::new(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.http.request(method, format!("{}{}", self.base, path));
        match self.token {
            Some(ref t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn json(req: reqwest::RequestBuilder) -> anyhow::Result<(u16, serde_json::Value)> {
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let body = resp.json::<serde_json::Value>().await?;
        Ok((status, body))
    }
}

async fn run_status(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let client = GatewayClient::from_config(config_path)?;
    let (status, body) =
        GatewayClient::json(client.request(reqwest::Method::GET, "/status")).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if status != 200 {
        anyhow::bail!("gateway answered {}", status);
    }
    Ok(())
}

async fn run_send(
    config_path: Option<std::path::PathBuf>,
    phone: String,
    message: String,
) -> anyhow::Result<()> {
    let client = GatewayClient::from_config(config_path)?;
    let req = client
        .request(reqwest::Method::POST, "/send-message")
        .json(&serde_json::json!({ "phone": phone, "message": message }));
    let (status, body) = GatewayClient::json(req).await?;
    let text = body
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("(no message)");
    if status != 200 {
        anyhow::bail!("gateway answered {}: {}", status, text);
    }
    println!("{}", text);
    Ok(())
}
