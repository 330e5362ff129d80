//! Phone verification, registration, and sign-in commands.

use clap::{Args, Subcommand};
use console::style;

use lc_core::config::AppConfig;
use lc_core::error::LcResult;
use lc_core::phone;
use lc_models::{ProfileUpdate, User};
use crate::OutputFormat;

use super::AppContext;

/// Profile fields accepted by `register` and `profile`.
#[derive(Args, Debug, Default)]
pub struct ProfileArgs {
    /// Display name.
    #[arg(long)]
    name: Option<String>,
    /// Avatar image URL.
    #[arg(long)]
    avatar: Option<String>,
    /// Status line.
    #[arg(long)]
    status: Option<String>,
    /// Region code, e.g. CO or MX.
    #[arg(long)]
    region: Option<String>,
}

impl From<ProfileArgs> for ProfileUpdate {
    fn from(args: ProfileArgs) -> Self {
        ProfileUpdate {
            name: args.name,
            avatar: args.avatar,
            status: args.status,
            region: args.region,
        }
    }
}

#[derive(Subcommand)]
pub enum AuthAction {
    /// Send a verification code to a phone number.
    Verify {
        /// Phone number in international format, e.g. +573001234567.
        phone: String,
    },
    /// Confirm the code and create the account.
    Register {
        /// The code received by SMS.
        code: String,
        #[command(flatten)]
        profile: ProfileArgs,
    },
    /// Sign in to an existing account.
    Login {
        /// Phone number in international format.
        phone: String,
        /// Account password (the code used at registration).
        #[arg(long)]
        password: String,
    },
    /// Sign out and forget the stored session.
    Logout,
    /// Show the signed-in user and verification state.
    Whoami,
    /// Update the signed-in user's profile.
    Profile {
        #[command(flatten)]
        profile: ProfileArgs,
    },
}

pub async fn run(config: AppConfig, offline: bool, action: AuthAction, format: OutputFormat) -> LcResult<()> {
    let ctx = super::build_context(config, offline).await?;
    let identity = ctx.registry.identity.clone();

    match action {
        AuthAction::Verify { phone: raw } => {
            let normalized = identity.start_phone_verification(&raw).await?;
            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!({
                    "phone": normalized,
                    "code_sent": true,
                })),
                OutputFormat::Text => {
                    println!("{} Code sent to {}", style("✓").green(), phone::redact(&normalized));
                    println!("  Run `latamchat auth register <code>` to finish.");
                }
            }
        }
        AuthAction::Register { code, profile } => {
            let user = identity.verify_phone_and_register(&code, profile.into()).await?;
            ctx.persist_session().await?;
            print_user(&user, "Registered", format);
        }
        AuthAction::Login { phone: raw, password } => {
            let user = identity.login(&raw, &password).await?;
            ctx.persist_session().await?;
            print_user(&user, "Signed in", format);
        }
        AuthAction::Logout => {
            identity.logout().await?;
            ctx.persist_session().await?;
            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!({ "signed_out": true })),
                OutputFormat::Text => println!("Signed out."),
            }
        }
        AuthAction::Whoami => {
            let state = identity.identity_state().await?;
            let user = identity.current_user().await;
            match format {
                OutputFormat::Json => super::print_json(&serde_json::json!({
                    "state": state.to_string(),
                    "backend": if ctx.is_online() { "hosted" } else { "local" },
                    "user": user,
                })),
                OutputFormat::Text => match user {
                    Some(user) => print_user(&user, "Signed in as", format),
                    None => println!("Not signed in ({state})."),
                },
            }
        }
        AuthAction::Profile { profile } => {
            let update: ProfileUpdate = profile.into();
            if update.is_empty() {
                println!("Nothing to update; pass --name, --avatar, --status or --region.");
            } else {
                let user = identity.update_profile(update).await?;
                print_user(&user, "Profile updated", format);
            }
        }
    }

    ctx.shutdown().await
}

fn print_user(user: &User, heading: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => super::print_json(&serde_json::json!(user)),
        OutputFormat::Text => {
            println!("{}", style(heading).bold().underlined());
            println!("  Name:    {}", user.display_name());
            println!("  Phone:   {}", user.phone);
            println!("  Status:  {}", if user.status.is_empty() { "-" } else { &user.status });
            println!("  Region:  {}", if user.region.is_empty() { "-" } else { &user.region });
            println!("  ID:      {}", user.id);
        }
    }
}
