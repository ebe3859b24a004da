use std::path::PathBuf;

use coronainfo::{
    cell_text_values, config_from_env, filter_by_country, init_logging, last_fetched_label,
    log_app_start, log_paths_selected, DatasetService, LoggingConfig, TABLE_HEADERS,
};

struct CliArgs {
    force_refresh: bool,
    filter: Option<String>,
    save_to: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = LoggingConfig::from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let args = parse_args(std::env::args().skip(1))?;
    let config = config_from_env();
    log_paths_selected(&config);

    let service = DatasetService::new(config)?;
    let dataset = service.get_dataset(args.force_refresh)?;

    println!("{}", last_fetched_label(&dataset.last_fetched));
    println!("{}", TABLE_HEADERS.join("\t"));
    for record in filter_by_country(&dataset.records, args.filter.as_deref().unwrap_or("")) {
        println!("{}", cell_text_values(record).join("\t"));
    }

    if let Some(dest) = args.save_to {
        let bytes = service.save_to(&dest)?;
        eprintln!("Saved {} bytes to {}", bytes, dest.display());
    }

    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs, String> {
    let mut out = CliArgs {
        force_refresh: false,
        filter: None,
        save_to: None,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--refresh" | "-r" => out.force_refresh = true,
            "--filter" | "-f" => {
                out.filter = Some(args.next().ok_or("--filter expects a country name")?);
            }
            "--save" | "-s" => {
                out.save_to = Some(PathBuf::from(
                    args.next().ok_or("--save expects a destination path")?,
                ));
            }
            other => {
                return Err(format!(
                    "unknown argument '{other}'\nusage: coronainfo [--refresh] [--filter TEXT] [--save PATH]"
                ))
            }
        }
    }

    Ok(out)
}
