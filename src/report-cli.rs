//! A simple CLI tool for summarising a tally dump offline.
//! This uses the server's own ranking and CSV rendering, so its output matches
//! `GET /leaderboard`, `GET /winner` and `GET /export`.

use std::fs::File;
use std::io::BufReader;

use clap::{builder::PossibleValuesParser, Arg, ArgAction, ArgMatches, Command};
use rocket::serde::json::serde_json;

use vote_ledger::model::{
    api::CandidateTally,
    candidate::Candidate,
    results::{leaderboard, to_csv, winner},
};

const PROGRAM_NAME: &str = "ledger-report";

const ABOUT_TEXT: &str = "Summarise the tally of a voting ledger.

EXIT CODES:
     0: Report printed.
     1: Error.
     2: No candidates, so no winner.";

const TALLY_PATH: &str = "TALLY_PATH";

const TALLY_PATH_HELP: &str = "The path to a JSON dump of the live tally,\n\
as returned by `GET /candidates`";

const MODE: &str = "MODE";

const MODE_HELP: &str = "What to print";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .arg(
            Arg::new(TALLY_PATH)
                .help(TALLY_PATH_HELP)
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(MODE)
                .help(MODE_HELP)
                .short('m')
                .long("mode")
                .action(ArgAction::Set)
                .value_parser(PossibleValuesParser::new(["leaderboard", "winner", "csv"]))
                .default_value("leaderboard"),
        )
}

/// Errors that this program may produce.
#[derive(Debug, Eq, PartialEq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// Failed to decode the JSON dump.
    Format(String),
}

/// Load a tally dump. Position in the dump stands in for insertion order.
fn load(path: &str) -> Result<Vec<Candidate>, Error> {
    let file = BufReader::new(File::open(path).map_err(|e| Error::IO(e.to_string()))?);
    let tally: Vec<CandidateTally> =
        serde_json::from_reader(file).map_err(|e| Error::Format(e.to_string()))?;

    Ok(tally
        .into_iter()
        .zip(1..)
        .map(|(entry, seq)| Candidate {
            name: entry.name,
            votes: entry.votes,
            seq,
        })
        .collect())
}

/// Render the requested report.
fn report(candidates: Vec<Candidate>, mode: &str) -> Option<String> {
    match mode {
        "winner" => winner(candidates).ok().map(|top| top.to_string()),
        "csv" => {
            let tally: Vec<CandidateTally> = candidates.into_iter().map(Into::into).collect();
            Some(to_csv(&tally))
        }
        _ => Some(
            leaderboard(candidates)
                .iter()
                .map(|standing| format!("{standing}\n"))
                .collect(),
        ),
    }
}

/// Print the report and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    let path: &String = args.get_one(TALLY_PATH).unwrap(); // Required argument is guaranteed to be present.
    let mode: &String = args.get_one(MODE).unwrap(); // Defaulted.
    match load(path) {
        Ok(candidates) => match report(candidates, mode) {
            Some(text) => {
                print!("{}", text.trim_end_matches('\n'));
                println!();
                0
            }
            None => {
                println!("There are no candidates, so there is no winner.");
                2
            }
        },
        Err(Error::IO(msg)) => {
            println!("IO error: {}", msg);
            1
        }
        Err(Error::Format(msg)) => {
            println!("Invalid JSON: {}", msg);
            1
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}
