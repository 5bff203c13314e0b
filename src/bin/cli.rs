use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs;

const TOKEN_FILE: &str = ".entitydb_token";

#[derive(Parser)]
#[command(name = "entitydb-cli")]
#[command(about = "CLI for entity_db", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "http://localhost:8000")]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        secret: String,
        /// admin | lecturer | student (server default: student)
        #[arg(short, long)]
        role: Option<String>,
    },
    Login {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        secret: String,
    },
    Me,
    List {
        #[arg(short = 'T', long = "type")]
        entity: String,
        #[arg(short, long, default_value = "-created_at")]
        sort: String,
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },
    Get {
        #[arg(short = 'T', long = "type")]
        entity: String,
        #[arg(short, long)]
        id: String,
    },
    Filter {
        #[arg(short = 'T', long = "type")]
        entity: String,
        /// JSON object of field -> exact value
        #[arg(short, long, default_value = "{}")]
        predicate: String,
        #[arg(short, long, default_value = "-created_at")]
        sort: String,
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },
    Create {
        #[arg(short = 'T', long = "type")]
        entity: String,
        /// JSON object for the new record
        #[arg(short, long)]
        data: String,
    },
    Update {
        #[arg(short = 'T', long = "type")]
        entity: String,
        #[arg(short, long)]
        id: String,
        /// JSON object merged over the stored record
        #[arg(short, long)]
        data: String,
    },
    Delete {
        #[arg(short = 'T', long = "type")]
        entity: String,
        #[arg(short, long)]
        id: String,
    },
    Ask {
        #[arg(short, long)]
        question: String,
        #[arg(short, long)]
        context: Option<String>,
        #[arg(long)]
        course_id: Option<i64>,
    },
    Quiz {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long, default_value_t = 5)]
        num_questions: u32,
        #[arg(short, long, default_value = "intermediate")]
        difficulty: String,
    },
    Logout,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

fn authed(builder: RequestBuilder) -> RequestBuilder {
    let token = fs::read_to_string(TOKEN_FILE).unwrap_or_default();
    builder.bearer_auth(token.trim())
}

fn parse_object(raw: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err("expected a JSON object".into());
    }
    Ok(value)
}

async fn print_response(builder: RequestBuilder) -> Result<(), Box<dyn std::error::Error>> {
    let res = builder.send().await?;
    let status = res.status();
    let text = res.text().await?;
    match serde_json::from_str::<Value>(&text) {
        Ok(body) => println!("{} {}", status, serde_json::to_string_pretty(&body)?),
        Err(_) => println!("{} {}", status, text),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let url = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Register { name, email, secret, role } => {
            let req = client
                .post(format!("{}/auth/register", url))
                .json(&json!({ "name": name, "email": email, "secret": secret, "role": role }));
            print_response(req).await?;
        }
        Commands::Login { name, secret } => {
            let res = client
                .post(format!("{}/auth/login", url))
                .json(&json!({ "name": name, "secret": secret }))
                .send()
                .await?;
            if res.status().is_success() {
                let body: LoginResponse = res.json().await?;
                fs::write(TOKEN_FILE, body.token)?;
                println!("Logged in. Token saved to {}", TOKEN_FILE);
            } else {
                println!("Login failed: {}", res.text().await?);
            }
        }
        Commands::Me => {
            print_response(authed(client.get(format!("{}/auth/me", url)))).await?;
        }
        Commands::List { entity, sort, limit } => {
            let req = client
                .get(format!("{}/entities/{}", url, entity))
                .query(&[("sort", sort), ("limit", limit.to_string())]);
            print_response(authed(req)).await?;
        }
        Commands::Get { entity, id } => {
            let req = client.get(format!("{}/entities/{}/{}", url, entity, id));
            print_response(authed(req)).await?;
        }
        Commands::Filter { entity, predicate, sort, limit } => {
            let req = client
                .post(format!("{}/entities/{}/filter", url, entity))
                .query(&[("sort", sort), ("limit", limit.to_string())])
                .json(&parse_object(&predicate)?);
            print_response(authed(req)).await?;
        }
        Commands::Create { entity, data } => {
            let req = client
                .post(format!("{}/entities/{}", url, entity))
                .json(&parse_object(&data)?);
            print_response(authed(req)).await?;
        }
        Commands::Update { entity, id, data } => {
            let req = client
                .put(format!("{}/entities/{}/{}", url, entity, id))
                .json(&parse_object(&data)?);
            print_response(authed(req)).await?;
        }
        Commands::Delete { entity, id } => {
            let req = client.delete(format!("{}/entities/{}/{}", url, entity, id));
            print_response(authed(req)).await?;
        }
        Commands::Ask { question, context, course_id } => {
            let req = client
                .post(format!("{}/ai/study-assistant", url))
                .json(&json!({ "question": question, "context": context, "course_id": course_id }));
            print_response(authed(req)).await?;
        }
        Commands::Quiz { topic, num_questions, difficulty } => {
            let req = client
                .post(format!("{}/ai/generate-quiz", url))
                .json(&json!({
                    "topic": topic,
                    "num_questions": num_questions,
                    "difficulty": difficulty,
                }));
            print_response(authed(req)).await?;
        }
        Commands::Logout => {
            let _ = fs::remove_file(TOKEN_FILE);
            println!("Logged out (token removed).");
        }
    }

    Ok(())
}
