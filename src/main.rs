#![forbid(unsafe_code)]

use anyhow::Result;
use log::info;
use poem::listener::{Listener, RustlsCertificate, RustlsConfig};
use poem::{listener::TcpListener, Route};
use poem_openapi::OpenApiService;

// Greeting Utilities
use crate::api::greeting::{GreetingApi, GreetingService};
use crate::utils::config::{init_greeting_args, init_greeting_dirs, init_log,
                           init_runtime_context, RuntimeCtx};
use crate::utils::errors::Errors;

// Modules
mod api;
mod utils;

// ***************************************************************************
//                                Constants
// ***************************************************************************
const SERVER_NAME : &str = "GreetingServer"; // for poem logging

// ---------------------------------------------------------------------------
// main:
// ---------------------------------------------------------------------------
#[tokio::main]
async fn main() -> Result<()> {
    // --------------- Initialize Server --------------
    // Announce ourselves.
    println!("Starting greeting_server!");

    // Directories are created even when we only run to create them.
    let args = init_greeting_args();
    let dirs = init_greeting_dirs(&args)?;
    if args.create_dirs_only {
        println!("Data directories created under {}", dirs.root_dir);
        return Ok(());
    }

    let runtime_ctx = greeting_init(args, dirs)?;
    let config = &runtime_ctx.parms.config;

    // --------------- Main Loop Set Up ---------------
    let server_url = config.server_url();
    let service = GreetingService::new(config.variant);
    info!("Serving the {} greeting variant.", service.variant());

    let api_service =
        OpenApiService::new(GreetingApi::new(service), config.title.as_str(), env!("CARGO_PKG_VERSION"))
            .server(server_url);
    let app = Route::new().nest("/", api_service);

    // ------------------ Main Loop -------------------
    let addr = format!("{}{}", "0.0.0.0:", config.http_port);
    match &config.tls {
        Some(tls) => {
            let certs_dir = &runtime_ctx.greeting_dirs.certs_dir;
            let listener = TcpListener::bind(addr).rustls(
                RustlsConfig::new().fallback(
                    RustlsCertificate::new()
                        .key(std::fs::read(tls.key_path(certs_dir))?)
                        .cert(std::fs::read(tls.cert_path(certs_dir))?),
                ),
            );
            poem::Server::new(listener).name(SERVER_NAME).run(app).await?;
        }
        None => {
            poem::Server::new(TcpListener::bind(addr)).name(SERVER_NAME).run(app).await?;
        }
    }
    Ok(())
}

// ***************************************************************************
//                             Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// greeting_init:
// ---------------------------------------------------------------------------
/** Configure logging and read the input parameters into the runtime context
 * that the main loop is built from.
 */
fn greeting_init(args: utils::config::GreetingArgs, dirs: utils::config::GreetingDirs) -> Result<RuntimeCtx> {
    // Configure our log.
    init_log(&dirs)?;
    info!("Data directories: logs={}, certs={}", dirs.logs_dir, dirs.certs_dir);

    let runtime_ctx = init_runtime_context(args, dirs)?;
    info!("{}", Errors::InputParms(format!("{:#?}", runtime_ctx)));

    // Log build info.
    print_version_info();

    Ok(runtime_ctx)
}

// ---------------------------------------------------------------------------
// print_version_info:
// ---------------------------------------------------------------------------
fn print_version_info() {
    info!("\n*** Running GREETING_SERVER={}, BRANCH={}, COMMIT={}, DIRTY={}, SRC_TS={}, RUSTC={}.",
          option_env!("CARGO_PKG_VERSION").unwrap_or("unknown"),
          env!("GIT_BRANCH"),
          env!("GIT_COMMIT_SHORT"),
          env!("GIT_DIRTY"),
          env!("SOURCE_TIMESTAMP"),
          env!("RUSTC_VERSION"),
    );
}
