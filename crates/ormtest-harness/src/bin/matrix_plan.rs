use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use ormtest_harness::HarnessError;
use ormtest_harness::log::init_tracing;
use ormtest_harness::matrix::{MatrixDefinition, plan_matrix, render_plan, write_plan_json};
use ormtest_harness::schema::RelationSchema;

#[derive(Debug)]
struct CliConfig {
    matrix_path: PathBuf,
    name: Option<String>,
    json: bool,
    output_path: Option<PathBuf>,
}

fn print_help() {
    let help = "\
matrix-plan: validate and expand a suite matrix definition

USAGE:
    cargo run -p ormtest-harness --bin matrix-plan -- --matrix <PATH> [OPTIONS]

OPTIONS:
    --matrix <PATH>   Matrix definition TOML file (required)
    --name <NAME>     Override the suite name from the file
    --json            Print the plan as JSON instead of text
    --output <PATH>   Write the JSON plan to path
    -h, --help        Show this help

EXIT CODES:
    0  plan is valid
    2  authoring error (missing axis, uncovered values, opt-out without reason)
    4  definition file missing or unparsable
";
    println!("{help}");
}

fn parse_args(args: &[String]) -> Result<CliConfig, String> {
    let mut matrix_path: Option<PathBuf> = None;
    let mut name: Option<String> = None;
    let mut json = false;
    let mut output_path: Option<PathBuf> = None;

    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--matrix" => {
                index += 1;
                if index >= args.len() {
                    return Err("--matrix requires a value".to_owned());
                }
                matrix_path = Some(PathBuf::from(&args[index]));
            }
            "--name" => {
                index += 1;
                if index >= args.len() {
                    return Err("--name requires a value".to_owned());
                }
                name = Some(args[index].clone());
            }
            "--json" => json = true,
            "--output" => {
                index += 1;
                if index >= args.len() {
                    return Err("--output requires a value".to_owned());
                }
                output_path = Some(PathBuf::from(&args[index]));
            }
            "-h" | "--help" => {
                print_help();
                return Err(String::new());
            }
            unknown => {
                return Err(format!("unknown option: {unknown}"));
            }
        }
        index += 1;
    }

    let Some(matrix_path) = matrix_path else {
        return Err("--matrix is required".to_owned());
    };
    Ok(CliConfig {
        matrix_path,
        name,
        json,
        output_path,
    })
}

fn run(config: &CliConfig) -> Result<(), HarnessError> {
    let definition = MatrixDefinition::load(&config.matrix_path)?;
    let name = config.name.as_deref().unwrap_or(&definition.name);
    let plan = plan_matrix(name, &definition.options, &RelationSchema::header_only())?;

    if let Some(output_path) = &config.output_path {
        write_plan_json(output_path, &plan)?;
    }
    if config.json {
        println!("{}", plan.to_json()?);
    } else {
        print!("{}", render_plan(&plan));
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let config = match parse_args(&args) {
        Ok(config) => config,
        Err(error) if error.is_empty() => return ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ERROR matrix-plan: {error}");
            return ExitCode::from(2);
        }
    };

    if let Err(error) = init_tracing("warn") {
        eprintln!("WARN matrix-plan: {error}");
    }

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ERROR matrix-plan failed: {error}");
            if let Some(hint) = error.suggestion() {
                eprintln!("hint: {hint}");
            }
            ExitCode::from(u8::try_from(error.exit_code()).unwrap_or(1))
        }
    }
}
