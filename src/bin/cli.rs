#![cfg(not(tarpaulin_include))]

use clap::Parser;
use datasheet::cell::{Row, cell_display, cell_from_input};
use datasheet::chart::{Aggregation, ChartKind, ChartRequest};
use datasheet::config::ClientConfig;
use datasheet::dataset::DatasetSnapshot;
use datasheet::gateway::{ColumnType, HttpGateway, NewColumn, Position};
use datasheet::generator::ChartSlot;
use datasheet::mutation::MutationEngine;
use datasheet::session::FileSessionStore;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Edit an uploaded dataset and build charts from a terminal
#[derive(Parser, Debug)]
#[command(name = "datasheet", version)]
struct Args {
    /// Backend API base URL
    #[arg(long, env = "DATASHEET_API_URL")]
    api_url: Option<String>,

    /// Where the session id is kept between runs
    #[arg(long, env = "DATASHEET_SESSION_FILE")]
    session_file: Option<PathBuf>,

    /// File to upload before the prompt opens
    #[arg(long)]
    upload: Option<PathBuf>,

    /// Rows printed by `show`
    #[arg(long, default_value_t = 20)]
    rows: usize,
}

const CELL_WIDTH: usize = 12;

fn print_help() {
    println!("Commands:");
    println!("  upload <path>                      Upload a CSV/XLSX/JSON file");
    println!("  use <dataset_id>                   Switch the active dataset");
    println!("  show [n]                           Print the first n rows");
    println!("  set <row> <column> <value>         Update one cell");
    println!("  addrow [index] col=value ...       Insert a row");
    println!("  delrow <row>                       Delete a row");
    println!("  addcol <name> [type] [default]     Add a column (string|number|boolean)");
    println!("  delcol <name>                      Delete a column");
    println!("  reload                             Refetch the dataset");
    println!("  charts                             List available chart kinds");
    println!("  chart <kind> x=<col> y=<a,b> [group=<col>] [agg=<fn>] [bins=<n>]");
    println!("  q                                  Quit");
}

fn fit(text: &str) -> String {
    if text.chars().count() > CELL_WIDTH {
        let cut: String = text.chars().take(CELL_WIDTH - 1).collect();
        format!("{}~", cut)
    } else {
        format!("{:<width$}", text, width = CELL_WIDTH)
    }
}

fn display(snapshot: &DatasetSnapshot, limit: usize) {
    if snapshot.columns.is_empty() {
        println!("(no data loaded)");
        return;
    }
    print!("{:>5} ", "");
    for column in &snapshot.columns {
        print!("{} ", fit(column));
    }
    println!();
    for (i, row) in snapshot.rows.iter().take(limit).enumerate() {
        print!("{:>5} ", i);
        for column in &snapshot.columns {
            let text = row.get(column).map(cell_display).unwrap_or_default();
            print!("{} ", fit(&text));
        }
        println!();
    }
    if snapshot.row_count() > limit {
        println!("... {} more rows", snapshot.row_count() - limit);
    }
}

/// Splits `key=value` tokens off a command line.
fn options<'a>(tokens: &[&'a str]) -> Vec<(&'a str, &'a str)> {
    tokens.iter().filter_map(|t| t.split_once('=')).collect()
}

fn chart_request(tokens: &[&str]) -> Result<ChartRequest, String> {
    let kind: ChartKind = tokens.first().ok_or("chart kind required")?.parse()?;
    let mut request = ChartRequest::new(kind);
    for (key, value) in options(&tokens[1..]) {
        request = match key {
            "x" => request.x(value),
            "y" => value
                .split(',')
                .filter(|c| !c.is_empty())
                .fold(request, |r, c| r.y(c)),
            "group" => request.group_by(value),
            "agg" => request.aggregation(value.parse::<Aggregation>()?),
            "bins" => request.bins(value.parse().map_err(|_| format!("bad bin count '{}'", value))?),
            other => return Err(format!("unknown option '{}'", other)),
        };
    }
    Ok(request)
}

async fn run(
    engine: &MutationEngine,
    charts: &ChartSlot,
    command: &str,
    show_rows: usize,
) -> Result<String, Box<dyn std::error::Error>> {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    let Some((&head, rest)) = tokens.split_first() else {
        return Ok("invalid command".to_string());
    };

    match head {
        "help" => {
            print_help();
        }
        "upload" => {
            let path = PathBuf::from(rest.first().ok_or("upload needs a path")?);
            let bytes = std::fs::read(&path)?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            let summary = engine.upload(&filename, bytes).await?;
            println!(
                "{}: {} rows, {} columns",
                summary.filename, summary.rows, summary.columns
            );
        }
        "use" => {
            let id = rest.first().ok_or("use needs a dataset id")?;
            engine.switch_dataset(*id).await?;
        }
        "show" => {
            let limit = rest.first().and_then(|n| n.parse().ok()).unwrap_or(show_rows);
            engine.with_snapshot(|s| display(s, limit));
        }
        "set" => {
            let [row, column, value @ ..] = rest else {
                return Ok("usage: set <row> <column> <value>".to_string());
            };
            let row: usize = row.parse()?;
            engine.update_cell(row, column, cell_from_input(&value.join(" "))).await?;
        }
        "addrow" => {
            let (position, fields) = match rest.first().and_then(|t| t.parse().ok()) {
                Some(index) => (Position::Index(index), &rest[1..]),
                None => (Position::End, rest),
            };
            let row: Row = options(fields)
                .into_iter()
                .map(|(k, v)| (k.to_string(), cell_from_input(v)))
                .collect();
            engine.add_row(row, position).await?;
        }
        "delrow" => {
            let row: usize = rest.first().ok_or("delrow needs a row index")?.parse()?;
            engine.delete_row(row).await?;
        }
        "addcol" => {
            let name = rest.first().ok_or("addcol needs a name")?;
            let data_type = match rest.get(1) {
                Some(t) => t.parse::<ColumnType>()?,
                None => ColumnType::String,
            };
            let mut column = NewColumn::new(*name, data_type);
            column.default_value = rest.get(2).map(|v| cell_from_input(v));
            engine.add_column(column).await?;
        }
        "delcol" => {
            let name = rest.first().ok_or("delcol needs a name")?;
            engine.delete_column(name).await?;
        }
        "reload" => {
            engine.reload().await?;
        }
        "charts" => {
            let catalog = charts.available(engine.session().as_ref()).await?;
            let kinds: Vec<String> = catalog.kinds().iter().map(|k| k.to_string()).collect();
            println!("charts:      {}", kinds.join(", "));
            println!("numeric:     {}", catalog.numeric_columns.join(", "));
            println!("categorical: {}", catalog.categorical_columns.join(", "));
        }
        "chart" => {
            let request = chart_request(rest)?;
            let model = charts.generate(engine.session().as_ref(), &request).await?;
            println!("{}", serde_json::to_string_pretty(&model)?);
        }
        _ => return Ok("unrecognized cmd".to_string()),
    }

    Ok("ok".to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = ClientConfig::from_env();
    if let Some(url) = args.api_url {
        config.api_base_url = url;
    }
    if let Some(path) = args.session_file {
        config.session_store_path = path;
    }

    let gateway = Arc::new(HttpGateway::new(&config)?);
    let store = Arc::new(FileSessionStore::new(config.session_store_path.clone()));
    let engine = MutationEngine::with_store(gateway.clone(), store)?;
    let charts = ChartSlot::new(gateway);

    if let Some(path) = &args.upload {
        let command = format!("upload {}", path.display());
        if let Err(e) = run(&engine, &charts, &command, args.rows).await {
            eprintln!("upload failed: {}", e);
        }
    } else if engine.session().is_some() {
        if let Err(e) = engine.reload().await {
            eprintln!("could not load the previous session: {}", e);
        }
    }

    let mut start_time = Instant::now();
    let mut status = String::from("ok");
    loop {
        print!("[{:.1}] ({}) > ", start_time.elapsed().as_secs_f64(), status);
        io::stdout().flush()?;

        let mut command = String::new();
        if io::stdin().read_line(&mut command)? == 0 {
            break;
        }
        let command = command.trim();
        start_time = Instant::now();

        if command == "q" {
            break;
        }

        status = match run(&engine, &charts, command, args.rows).await {
            Ok(status) => status,
            Err(e) => e.to_string(),
        };
    }

    Ok(())
}
