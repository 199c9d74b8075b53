#![cfg(not(tarpaulin_include))]

use clap::Parser;

/// Render one sample chart of every kind to PNG
#[derive(Parser, Debug)]
struct Args {
    /// Output directory
    #[arg(long, default_value = "graph_output")]
    out: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let charts = datasheet::graph::create_example_charts(&args.out);
    for (kind, file_path) in &charts {
        println!("Created {} chart at {}", kind, file_path);
    }
    if charts.is_empty() {
        return Err(format!("no charts rendered into {}", args.out).into());
    }

    Ok(())
}
