use crate::demo::{check_templates, run_demo, DemoArgs, TemplateCheckArgs};
use crate::server;
use accredit::error::AppError;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "Accreditation Compliance Service",
    about = "Run and demonstrate the accreditation compliance backend from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Inspect parameter template catalogs
    Templates {
        #[command(subcommand)]
        command: TemplatesCommand,
    },
    /// Walk one institution through declaration, review, analysis, and decision
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum TemplatesCommand {
    /// Parse a template CSV and summarise it per category
    Check(TemplateCheckArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Label of the super-admin key issued at startup
    #[arg(long, default_value = "bootstrap")]
    pub(crate) bootstrap_service: String,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or_else(|| {
        Command::Serve(ServeArgs {
            bootstrap_service: "bootstrap".to_string(),
            ..ServeArgs::default()
        })
    });

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Templates {
            command: TemplatesCommand::Check(args),
        } => check_templates(args),
        Command::Demo(args) => run_demo(args),
    }
}
