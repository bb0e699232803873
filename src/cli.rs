use clap::Parser;

/// Fetch the configured news feeds through the CORS relay, normalize them
/// into one digest, and print it or write it as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// YAML file with the feed list; defaults to the built-in sources
    #[arg(short, long)]
    pub feeds: Option<String>,

    /// Write the digest snapshot as JSON to this path
    #[arg(short, long)]
    pub json_output: Option<String>,

    /// Restrict the digest to these source names (repeatable)
    #[arg(short, long)]
    pub source: Vec<String>,
}
