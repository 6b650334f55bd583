//! Runs one shot through a simulated chassis and prints what the boards end up outputting.

use clap::Parser;
use ndarray::Array2;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

use pxicompiler_backend::*;
use pxictrl_backend::*;

#[derive(Parser, Debug)]
#[command(name = "pxictrl_backend_bin", about = "Run a shot against simulated PXI output boards")]
struct Args {
    /// Chassis TOML file. One board of each model when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shot JSON file. A ramp on every output when absent.
    #[arg(long)]
    shot: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG.
    #[arg(long, default_value = "info")]
    log: String,

    /// Ticks of the built-in ramp.
    #[arg(long, default_value_t = 16)]
    samples: usize,

    /// Abort the shot instead of letting it finish.
    #[arg(long)]
    abort: bool,
}

fn ramp_shot(config: &ChassisConfig, samples: usize) -> Result<Shot, CompileError> {
    let mut exp = Experiment::new();
    for board in &config.boards {
        match board.model {
            Model::Pxi6733 => {
                exp.add_ao_device(&board.name, &board.connection, &board.clock_terminal)?;
                let n = board.num_outputs.unwrap_or(board.model.capabilities().n_analogs);
                for id in 0..n {
                    exp.add_ao_channel(&board.name, id)?;
                }
                let mut table = Array2::from_shape_fn((samples, n), |(t, ch)| (ch as f64 + 1.0) * t as f64 / samples as f64);
                // The last tick repeats the one before; it is never generated.
                if samples >= 2 {
                    let before_last = table.row(samples - 2).to_owned();
                    table.row_mut(samples - 1).assign(&before_last);
                }
                exp.set_analog_table(&board.name, table)?;
            }
            Model::Pxie6535 => {
                exp.add_do_device(&board.name, &board.connection, &board.clock_terminal)?;
                exp.add_do_channel(&board.name, 0, 0)?;
                exp.add_do_channel(&board.name, 1, 0)?;
                let lines = Array2::from_shape_fn((samples, 2), |(t, line)| match line {
                    0 => (t % 2) as u8,
                    _ => (t >= samples / 2) as u8,
                });
                exp.set_digital_table(&board.name, lines)?;
            }
        }
    }
    exp.compile()
}

fn zeros(config: &ChassisConfig) -> HashMap<String, FrontPanelValues> {
    config
        .boards
        .iter()
        .map(|board| {
            let values = board.channel_names().into_iter().map(|name| (name, 0.0)).collect();
            (board.name.clone(), values)
        })
        .collect()
}

fn run(args: &Args) -> Result<(), WorkerError> {
    let config = match &args.config {
        Some(path) => ChassisConfig::load(path)?,
        None => ChassisConfig::demo(),
    };
    let shot = match &args.shot {
        Some(path) => Shot::load(path)?,
        None => ramp_shot(&config, args.samples)?,
    };

    let sim = SimDriver::new(DriverVersion::new(20, 1, 0));
    // The first digital board's port0/line0 drives every analog clock terminal.
    let digital = config.boards.iter().find(|b| b.model == Model::Pxie6535);
    for analog in config.boards.iter().filter(|b| b.model == Model::Pxi6733) {
        if let Some(digital) = digital {
            sim.route_terminal(&analog.clock_terminal, &format!("{}/port0/line0", digital.connection));
        }
    }

    let mut chassis = Chassis::from_config(&config, |name| sim.for_board(name))?;
    chassis.init()?;

    let initial_values = zeros(&config);
    for (name, values) in &initial_values {
        if let Some(worker) = chassis.worker_mut(name) {
            worker.program_manual(values)?;
        }
    }

    let final_values = chassis.transition_to_buffered(&shot, &initial_values)?;
    if args.abort {
        chassis.abort_buffered()?;
    } else {
        sim.finish_buffered();
        chassis.transition_to_manual(false)?;
    }

    for board in &config.boards {
        let Some(values) = final_values.get(&board.name) else {
            continue;
        };
        let mut names: Vec<&String> = values.keys().collect();
        names.sort();
        for name in names {
            let physical = format!("{}/{}", board.connection, name);
            println!(
                "{:>10} {:<14} final {:>8.4} output {:>8.4}",
                board.name,
                name,
                values[name],
                sim.output(&physical).unwrap_or(f64::NAN)
            );
        }
    }
    chassis.shutdown()
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
