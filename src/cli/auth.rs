//! CLI command handlers for login, status, whoami, refresh, and logout.

use crate::auth::{AuthController, AuthStatus};

use super::LoginArgs;

/// Handle `langchef-auth login`.
pub async fn handle_login(
    controller: &AuthController,
    args: &LoginArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if args.aws_credentials {
        let user = controller.login_with_server_credentials().await?;
        println!("✅ Signed in as {}", user.username);
        return Ok(());
    }

    let mut snapshots = controller.watch_snapshot();
    if !controller.login().await? {
        if let Some(session) = controller.session() {
            println!("✅ Already signed in as {}", session.user.username);
        }
        return Ok(());
    }

    let mut shown_code: Option<String> = None;
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        match snapshot.status {
            AuthStatus::Authorizing => {
                if let Some(pending) = snapshot.pending {
                    if shown_code.as_deref() != Some(pending.user_code.as_str()) {
                        if pending.opened {
                            println!("🌐 Opened {}", pending.verification_uri_complete);
                        } else {
                            println!("🔗 Visit: {}", pending.verification_uri);
                        }
                        println!("📋 Enter code: {}", pending.user_code);
                        println!("⏳ Waiting for authorization...");
                        shown_code = Some(pending.user_code);
                    }
                }
            }
            AuthStatus::Authenticated => {
                let username = snapshot.user.map(|user| user.username).unwrap_or_default();
                println!("✅ Signed in as {username}");
                return Ok(());
            }
            AuthStatus::Idle | AuthStatus::Expired | AuthStatus::Denied | AuthStatus::Abandoned => {
                let message = snapshot
                    .error
                    .map(|failure| failure.to_string())
                    .unwrap_or_else(|| "Sign-in was cancelled.".to_string());
                return Err(message.into());
            }
        }
        if snapshots.changed().await.is_err() {
            return Err("Auth controller stopped".into());
        }
    }
}

/// Handle `langchef-auth status`.
pub async fn handle_status(controller: &AuthController) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔐 Authentication Status\n");
    println!("  API: {}", controller.config().api_base_url);
    println!("  Profile: {}", controller.config().profile);

    match controller.session() {
        Some(session) => {
            println!("  Status: ✅ Signed in as {}", session.user.username);
            if let Some(email) = &session.user.email {
                println!("  Email: {email}");
            }
            println!(
                "  Expires: {}",
                session.expires_at.format("%Y-%m-%d %H:%M UTC")
            );
        }
        None => match controller.snapshot().pending {
            Some(pending) => {
                println!("  Status: ⏳ Waiting for authorization");
                println!("  Visit: {}", pending.verification_uri);
                println!("  Code: {}", pending.user_code);
            }
            None => println!("  Status: ❌ Not signed in"),
        },
    }
    Ok(())
}

/// Handle `langchef-auth whoami`.
pub async fn handle_whoami(controller: &AuthController) -> Result<(), Box<dyn std::error::Error>> {
    let user = controller.reload_profile().await?;
    println!("{}", user.username);
    if let Some(full_name) = &user.full_name {
        println!("  Name: {full_name}");
    }
    if let Some(email) = &user.email {
        println!("  Email: {email}");
    }
    Ok(())
}

/// Handle `langchef-auth refresh`.
pub async fn handle_refresh(controller: &AuthController) -> Result<(), Box<dyn std::error::Error>> {
    if !controller.is_authenticated() {
        return Err("Not signed in".into());
    }
    if controller.refresh_session(false).await {
        if let Some(session) = controller.session() {
            println!(
                "✅ Session renewed until {}",
                session.expires_at.format("%Y-%m-%d %H:%M UTC")
            );
        }
        Ok(())
    } else {
        Err("Session could not be renewed. Please sign in again.".into())
    }
}

/// Handle `langchef-auth logout`.
pub async fn handle_logout(controller: &AuthController) -> Result<(), Box<dyn std::error::Error>> {
    controller.logout().await;
    println!("✅ Signed out");
    Ok(())
}
