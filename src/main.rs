//! Systolic array MPU simulator CLI
//!
//! Usage:
//!   mpusim -m 8 -n 8 -k 8
//!   mpusim -W 4 -H 4 -d 8 -a 8 -m 13 -n 10 -k 9 --types int16
//!   mpusim --config mpu.toml --input operands.json --print-result --json

use clap::Parser as ClapParser;
use colored::Colorize;
use serde::Deserialize;
use std::fs;
use std::sync::mpsc;

use mpu_sim::{AnyMpu, MpuConfig, MpuError, MpuResult, NumericConfig, StatisticsEntry};

/// Weight matrix name used for the CLI multiplication
const OPERATION_NAME: &str = "cli";

#[derive(ClapParser, Debug)]
#[command(name = "mpusim")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Cycle-accurate simulation of a systolic array matrix processing unit")]
struct Args {
    /// Hardware configuration file (TOML)
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// Systolic array width (PE columns)
    #[arg(short = 'W', long = "width")]
    width: Option<usize>,

    /// Systolic array height (PE rows)
    #[arg(short = 'H', long = "height")]
    height: Option<usize>,

    /// Activation FIFO depth
    #[arg(short = 'd', long = "fifo-depth")]
    fifo_depth: Option<usize>,

    /// Accumulator rows, split into two buffers
    #[arg(short = 'a', long = "acc-height")]
    acc_height: Option<usize>,

    /// Numeric types (int8, int16, int32, uint8)
    #[arg(short = 't', long = "types")]
    types: Option<NumericConfig>,

    /// Rows of the activation matrix
    #[arg(short = 'm', default_value = "8")]
    m: usize,

    /// Columns of the weight matrix
    #[arg(short = 'n', default_value = "8")]
    n: usize,

    /// Inner dimension
    #[arg(short = 'k', default_value = "8")]
    k: usize,

    /// Operands as JSON: {"a": [[..]], "b": [[..]]}
    #[arg(short = 'i', long = "input")]
    input: Option<String>,

    /// Skip checking the result against the reference product
    #[arg(long = "no-verify")]
    no_verify: bool,

    /// Output statistics as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Print the result matrix
    #[arg(long = "print-result")]
    print_result: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Deserialize)]
struct Operands {
    a: Vec<Vec<i64>>,
    b: Vec<Vec<i64>>,
}

/// Row-major matrix with its shape
struct Matrix {
    values: Vec<i64>,
    rows: usize,
    columns: usize,
}

impl Matrix {
    fn from_rows(rows: Vec<Vec<i64>>, name: &str) -> MpuResult<Self> {
        let columns = rows.first().map_or(0, |r| r.len());
        if columns == 0 {
            return Err(MpuError::malformed(format!("matrix '{}' is empty", name)));
        }
        if let Some(row) = rows.iter().position(|r| r.len() != columns) {
            return Err(MpuError::malformed(format!(
                "row {} of matrix '{}' has {} elements, expected {}",
                row,
                name,
                rows[row].len(),
                columns
            )));
        }
        Ok(Self {
            rows: rows.len(),
            columns,
            values: rows.into_iter().flatten().collect(),
        })
    }

    /// Deterministic values in -5..=5 derived from the element index
    fn pattern(rows: usize, columns: usize, seed: i64) -> Self {
        let values = (0..rows * columns)
            .map(|i| ((i as i64 * 7 + seed * 3) % 11) - 5)
            .collect();
        Self { values, rows, columns }
    }
}

fn build_config(args: &Args) -> MpuResult<MpuConfig> {
    let mut config = match &args.config {
        Some(path) => MpuConfig::load(path)?,
        None => MpuConfig::default_8x256(),
    };
    if let Some(width) = args.width {
        config.array_width = width;
    }
    if let Some(height) = args.height {
        config.array_height = height;
    }
    if let Some(depth) = args.fifo_depth {
        config.activation_fifo_depth = depth;
    }
    if let Some(acc_height) = args.acc_height {
        config.accumulator_height = acc_height;
    }
    if let Some(types) = args.types {
        config.numeric = types;
    }
    if args.no_verify {
        config.verify = false;
    }
    config.validate()?;
    Ok(config)
}

fn load_operands(args: &Args) -> MpuResult<(Matrix, Matrix)> {
    let Some(path) = &args.input else {
        return Ok((
            Matrix::pattern(args.m, args.k, 1),
            Matrix::pattern(args.k, args.n, 2),
        ));
    };

    let content = fs::read_to_string(path)
        .map_err(|e| MpuError::malformed(format!("failed to read input file '{}': {}", path, e)))?;
    let operands: Operands = serde_json::from_str(&content)
        .map_err(|e| MpuError::malformed(format!("invalid operand JSON: {}", e)))?;
    let a = Matrix::from_rows(operands.a, "a")?;
    let b = Matrix::from_rows(operands.b, "b")?;
    if a.columns != b.rows {
        return Err(MpuError::malformed(format!(
            "cannot multiply {}x{} by {}x{}",
            a.rows, a.columns, b.rows, b.columns
        )));
    }
    Ok((a, b))
}

struct Outcome {
    entry: StatisticsEntry,
    result: Vec<i64>,
    columns: usize,
    verified: bool,
}

fn run(args: &Args) -> MpuResult<Outcome> {
    let config = build_config(args)?;
    let verified = config.verify;
    let (a, b) = load_operands(args)?;
    log::info!(
        "simulating {}x{} @ {}x{} as {}",
        a.rows,
        a.columns,
        b.rows,
        b.columns,
        config.numeric
    );

    let mut mpu = AnyMpu::new(config)?;
    let (tx, rx) = mpsc::channel();
    mpu.register_statistics_callback(Box::new(move |entry| {
        let _ = tx.send(entry);
    }));

    mpu.store_weight_matrix(OPERATION_NAME, &b.values, b.rows, b.columns)?;
    mpu.store_activation_matrix(&a.values, a.rows, a.columns)?;
    log::debug!("unified buffer layout:\n{}", mpu.memory_layout());
    mpu.run_multiplication_named(OPERATION_NAME)?;

    let result = mpu.load_result_matrix()?;
    let entry = rx
        .try_recv()
        .unwrap_or_else(|_| mpu.statistics_entry(OPERATION_NAME, a.rows, b.columns, a.columns));
    Ok(Outcome {
        entry,
        result,
        columns: b.columns,
        verified,
    })
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let outcome = match run(&args) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };

    if args.json_output {
        match outcome.entry.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("{}: Failed to serialize to JSON: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
    } else {
        print_statistics(&outcome.entry, outcome.verified);
    }

    if args.print_result {
        print_result(&outcome.result, outcome.columns);
    }
}

fn print_statistics(entry: &StatisticsEntry, verified: bool) {
    println!("{}", "Simulation Results".bold().green());
    println!("{}", "=".repeat(50));
    println!();

    println!(
        "{}: {}x{} systolic array",
        "Target".cyan(),
        entry.systolic_array_width,
        entry.systolic_array_height
    );
    println!(
        "{}: FIFO depth {}, accumulator height {}",
        "Buffers".cyan(),
        entry.activation_fifo_depth,
        entry.accumulator_array_height
    );
    println!(
        "{}: M={} N={} K={}",
        "Shape".cyan(),
        entry.m,
        entry.n,
        entry.k
    );
    println!(
        "{}: {} total, {} stalled",
        "Iterations".cyan(),
        entry.total_iterations,
        entry.stalled_iterations
    );
    println!();

    println!("{}", "Data Movement".bold().yellow());
    println!("{}", "-".repeat(50));
    println!("  {}: {}", "Intra-PE".cyan(), entry.intra_pe_data_movements);
    println!("  {}: {}", "Inter-PE".cyan(), entry.inter_pe_data_movements);
    println!("  {}: {}", "Activation loads".cyan(), entry.sdsu_unified_buffer_loads);
    println!(
        "  {}: {} (max {} concurrent, {} per column)",
        "Weight loads".cyan(),
        entry.weight_fetcher_unified_buffer_loads,
        entry.weight_fetcher_concurrent_loads_max,
        entry.weight_fetcher_concurrent_loads_per_column_max
    );
    println!(
        "  {}: {} (max {} concurrent, {} per column)",
        "Accumulator loads".cyan(),
        entry.accumulator_array_loads,
        entry.accumulator_array_concurrent_loads_max,
        entry.accumulator_array_concurrent_loads_per_column_max
    );
    println!(
        "  {}: {}",
        "Zero-weight multiplications".cyan(),
        entry.multiplications_with_weight_zero
    );
    println!();

    println!("{}", "Footprint".bold().yellow());
    println!("{}", "-".repeat(50));
    println!("  {}: {}", "Control register bits".cyan(), entry.control_register_bits());
    println!("  {}: {}", "Data register bits".cyan(), entry.data_register_bits());
    println!("  {}: {}", "Unified buffer bits".cyan(), entry.unified_buffer_bits);

    if verified {
        println!();
        println!("{}", "Result matches the reference product".green());
    }
}

fn print_result(result: &[i64], columns: usize) {
    println!();
    println!("{}", "Result Matrix".bold().yellow());
    println!("{}", "-".repeat(50));
    for row in result.chunks(columns.max(1)) {
        let line: Vec<String> = row.iter().map(|v| format!("{:>8}", v)).collect();
        println!("{}", line.join(""));
    }
}
