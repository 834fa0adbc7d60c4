use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{ClientError, GatewayClient, ScanUpload};
use shared::{domain::AnalysisId, protocol::RegisterRequest};
use tracing::debug;

mod profile;
mod render;

use profile::{Profile, ProfileStore};

#[derive(Parser, Debug)]
#[command(name = "stonescan", about = "Kidney stone scan analysis client")]
struct Cli {
    #[arg(long, env = "STONESCAN_SERVER_URL", default_value = "http://127.0.0.1:3000")]
    server_url: String,
    /// Where the session profile is kept.
    #[arg(long, env = "STONESCAN_DATA_DIR")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account and sign in.
    Register {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: String,
        /// YYYY-MM-DD
        #[arg(long)]
        date_of_birth: String,
        #[arg(long)]
        gender: String,
        #[arg(long, env = "STONESCAN_PASSWORD")]
        password: String,
        #[arg(long)]
        agree_terms: bool,
        #[arg(long)]
        agree_privacy: bool,
    },
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "STONESCAN_PASSWORD")]
        password: String,
    },
    /// Sign in with a Google (or other provider) ID token.
    LoginOauth {
        provider_id_token: String,
        #[arg(long)]
        provider: Option<String>,
    },
    /// Exchange an existing Firebase ID token for a session.
    Session { id_token: String },
    Logout,
    /// Upload a JPEG or PNG scan for analysis.
    Upload {
        image: PathBuf,
        /// Save the annotated image here.
        #[arg(long)]
        annotated_out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// List past analyses, newest first.
    Results {
        #[arg(long)]
        limit: Option<u32>,
    },
    Show {
        analysis_id: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Download the PDF report for an analysis.
    Report {
        analysis_id: Option<i64>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Ask the assistant about an analysis.
    Ask {
        question: String,
        #[arg(long)]
        analysis_id: Option<i64>,
    },
    /// Gateway and inference service status.
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = ProfileStore::resolve(cli.data_dir.as_deref())?;
    let mut profile = store.load()?;
    let mut client = GatewayClient::new(&cli.server_url)?
        .with_session(profile.session_for(&cli.server_url));
    debug!(profile = %store.path().display(), signed_in = client.is_signed_in(), "loaded profile");

    let outcome = run(cli.command, &mut client, &mut profile).await;
    profile.server_url = client.server_url().to_string();
    profile.session_token = client.session_token().map(str::to_string);
    if let Err(err) = &outcome {
        if err.downcast_ref::<ClientError>().is_some_and(session_rejected) {
            profile.sign_out();
            eprintln!("Your session has expired. Please log in again.");
        }
    }
    store.save(&profile)?;
    outcome
}

/// The auth gate turned the stored cookie away.
fn session_rejected(err: &ClientError) -> bool {
    match err {
        ClientError::Rejected { status: 401, body } => {
            matches!(body.error.as_str(), "Not authenticated" | "Session expired")
        }
        _ => false,
    }
}

fn resolve_analysis(requested: Option<i64>, profile: &Profile) -> Result<AnalysisId> {
    match requested.or(profile.last_analysis_id) {
        Some(id) => Ok(AnalysisId(id)),
        None => bail!("no analysis selected; pass an analysis id or run `upload` first"),
    }
}

async fn run(command: Command, client: &mut GatewayClient, profile: &mut Profile) -> Result<()> {
    match command {
        Command::Register {
            first_name,
            last_name,
            email,
            phone,
            date_of_birth,
            gender,
            password,
            agree_terms,
            agree_privacy,
        } => {
            let form = RegisterRequest {
                first_name,
                last_name,
                email,
                phone,
                date_of_birth,
                gender,
                confirm_password: password.clone(),
                password,
                agree_terms,
                agree_privacy,
            };
            if let Err(errors) = shared::validation::validate_registration(&form) {
                for (field, message) in errors {
                    eprintln!("{field}: {message}");
                }
                bail!("Validation failed");
            }
            let session = client.register(&form).await?;
            profile.email = session.email;
            println!("Account created. Signed in.");
        }
        Command::Login { email, password } => {
            let session = client.login(&email, &password).await?;
            profile.email = session.email.or(Some(email));
            println!("Signed in as {}", profile.email.as_deref().unwrap_or("unknown"));
        }
        Command::LoginOauth {
            provider_id_token,
            provider,
        } => {
            let session = client
                .login_with_oauth(&provider_id_token, provider.as_deref())
                .await?;
            profile.email = session.email;
            println!("Signed in.");
        }
        Command::Session { id_token } => {
            let session = client.establish_session(&id_token).await?;
            profile.email = session.email;
            println!("Session established for {}", session.uid.unwrap_or_default());
        }
        Command::Logout => {
            client.logout().await?;
            profile.sign_out();
            println!("Signed out.");
        }
        Command::Upload {
            image,
            annotated_out,
            json,
        } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("failed to read {}", image.display()))?;
            let upload = ScanUpload::from_path(&image, bytes);
            upload.validate()?;
            println!("Analyzing {}...", upload.filename);
            let result = client.detect(&upload).await?;
            if let Some(id) = result.analysis_id {
                profile.last_analysis_id = Some(id.0);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", render::render_analysis(&result));
            }
            if let Some(out) = annotated_out {
                match render::annotated_image_bytes(&result)? {
                    Some(bytes) => {
                        tokio::fs::write(&out, bytes)
                            .await
                            .with_context(|| format!("failed to write {}", out.display()))?;
                        println!("Annotated image saved to {}", out.display());
                    }
                    None => eprintln!("The analysis did not include an annotated image."),
                }
            }
        }
        Command::Results { limit } => {
            let history = client.results(limit).await?;
            print!("{}", render::render_history(&history));
        }
        Command::Show { analysis_id, json } => {
            let id = resolve_analysis(analysis_id, profile)?;
            let result = client.result(id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", render::render_analysis(&result));
            }
        }
        Command::Report { analysis_id, out } => {
            let id = resolve_analysis(analysis_id, profile)?;
            let result = client.result(id).await?;
            let report = client.report(&result).await?;
            let path = out.unwrap_or_else(|| PathBuf::from(&report.filename));
            tokio::fs::write(&path, &report.bytes)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Report saved to {}", path.display());
        }
        Command::Ask {
            question,
            analysis_id,
        } => {
            let context = match analysis_id.or(profile.last_analysis_id) {
                Some(id) => Some(client.result(AnalysisId(id)).await?),
                None => None,
            };
            match client.ask(&question, context.as_ref()).await {
                Ok(answer) => println!("{}", answer.response),
                Err(ClientError::Rejected { status: 502, body }) => println!("{}", body.error),
                Err(e) => return Err(e.into()),
            }
        }
        Command::Health => {
            let report = client.detect_health().await?;
            print!("{}", render::render_health(&report));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
