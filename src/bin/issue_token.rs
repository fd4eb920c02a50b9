//! Mints a development HS256 bearer token signed with the configured `auth_secret`.
//!
//! Reads one JSON line from stdin: `{"user_id": "...", "ttl_seconds": 3600}`.
use medalt_api::auth::{TokenSigner, now_secs};
use medalt_api::config::Config;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct Input {
    user_id: String,
    #[serde(default = "default_ttl")]
    ttl_seconds: u64,
}

fn default_ttl() -> u64 {
    7 * 24 * 60 * 60
}

#[derive(Serialize)]
struct Output {
    token: String,
    expires_at: u64,
}

fn main() {
    let config = Config::load().unwrap_or_else(|err| {
        eprintln!("Failed to load configuration: {}", err);
        std::process::exit(1);
    });

    let Some(secret) = config.auth_secret else {
        eprintln!("auth_secret is not set");
        std::process::exit(1);
    };

    let mut input = String::new();
    std::io::stdin().read_line(&mut input).unwrap();
    let parsed: Input = serde_json::from_str(&input).unwrap();

    let expires_at = now_secs() + parsed.ttl_seconds;
    let signer = TokenSigner::new(&secret);
    let token = signer
        .issue(&parsed.user_id, expires_at)
        .unwrap_or_else(|err| {
            eprintln!("{}", err);
            std::process::exit(1);
        });

    let out = Output { token, expires_at };
    println!("{}", serde_json::to_string(&out).unwrap());
}
