use std::net::SocketAddr;

use clap::Parser;
use gatehouse::cli::{
    Args, build_config, handle_promote_admin, init_logging, load_key_material, open_database,
    print_generated_keys, validate_origin,
};
use gatehouse::{create_app, init_cleanup};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    if args.generate_keys {
        if let Err(e) = print_generated_keys() {
            error!(error = %e, "Failed to generate keys");
            std::process::exit(1);
        }
        return;
    }

    let Some((access_keys, refresh_keys)) = load_key_material(&args) else {
        std::process::exit(1);
    };

    let Some(origin) = validate_origin(&args.origin) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Some(email) = &args.promote_admin {
        if !handle_promote_admin(&db, email).await {
            std::process::exit(1);
        }
    }

    let config = build_config(&args, db, origin, access_keys, refresh_keys);
    let app = match create_app(&config) {
        Ok(app) => app,
        Err(e) => {
            error!(kind = e.kind(), error = %e, "Failed to load signing keys");
            std::process::exit(1);
        }
    };

    init_cleanup(&config).await;

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, "Listening"),
        Err(e) => error!(error = %e, "Failed to get local address"),
    }

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
