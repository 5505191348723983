use elmerge::{
    init_logging, log_app_start, log_config_resolved, logging_config_from_env,
    pipeline_config_from_env, run_pipeline, transport_from_config, Window,
};

const USAGE: &str = "usage: elmerge <start> <end>  (ISO-8601; end is exclusive; \
                     ELMERGE_START/ELMERGE_END are used when arguments are omitted)";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let cfg = pipeline_config_from_env()?;
    log_config_resolved(&cfg);

    let (start_raw, end_raw) = window_bounds().ok_or(USAGE)?;
    let window = Window::parse(&start_raw, &end_raw, cfg.timezone())?;

    let transport = transport_from_config(&cfg)?;
    let report = run_pipeline(&cfg, transport.as_ref(), &window)?;

    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn window_bounds() -> Option<(String, String)> {
    let mut args = std::env::args().skip(1);
    match (args.next(), args.next()) {
        (Some(start), Some(end)) => Some((start, end)),
        _ => {
            let start = std::env::var("ELMERGE_START").ok()?;
            let end = std::env::var("ELMERGE_END").ok()?;
            Some((start, end))
        }
    }
}
