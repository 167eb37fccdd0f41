use clap::Parser;

/// Command line arguments. Values given here override the config file.
#[derive(Parser, Debug)]
#[command(name = "chord-ring", about = "A Chord ring membership and routing node")]
pub struct Cli {
    /// Own gRPC address as host:port
    #[arg(long = "grpc")]
    pub grpc_address: Option<String>,

    /// Address host:port of a ring member to join through
    #[arg(long = "peer")]
    pub peer: Option<String>,

    /// Optional INI config file
    #[arg(short = 'c', long = "config")]
    pub config_file: Option<String>,

    /// Explicit ring identifier of this node (defaults to the address hash)
    #[arg(long = "id")]
    pub id: Option<u64>,

    /// Explicit ring identifier of the join peer
    #[arg(long = "peer-id")]
    pub peer_id: Option<u64>,

    /// Identifier space width in bits (1..=64)
    #[arg(long = "bits")]
    pub hash_bits: Option<u8>,

    /// Address host:port for the HTML status page
    #[arg(long = "web")]
    pub web_address: Option<String>,

    /// Enable debug RPCs (node summaries)
    #[arg(long = "debug")]
    pub debug: bool,
}
