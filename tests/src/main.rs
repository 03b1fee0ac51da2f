use clap::{Parser, Subcommand, ValueEnum};

mod backend;
mod harness;
mod scenarios;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one of the engine's end-to-end scenarios against the in-process
    /// loopback harness
    Scenario {
        #[arg(value_enum)]
        which: Scenario,
    },
}

#[derive(Clone, ValueEnum, Debug)]
enum Scenario {
    /// A. Handshake then close
    HandshakeClose,
    /// B. One-frame overlay session
    OneFrame,
    /// C. Layer cap exceeded
    LayerCap,
    /// D. Destroy while referenced
    DeferredDestroy,
    /// E. Main exits mid-session
    MainLoss,
    /// F. Unknown chain records
    UnknownChain,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Commands::Scenario { which } => match which {
            Scenario::HandshakeClose => scenarios::handshake_then_close(),
            Scenario::OneFrame => scenarios::one_frame_overlay(),
            Scenario::LayerCap => scenarios::layer_cap_exceeded(),
            Scenario::DeferredDestroy => scenarios::destroy_while_referenced(),
            Scenario::MainLoss => scenarios::main_exits_mid_session(),
            Scenario::UnknownChain => scenarios::unknown_chain_records(),
        },
    }
}
