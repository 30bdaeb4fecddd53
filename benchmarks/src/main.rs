use anyhow::anyhow;
use clap::Parser;
use const_format::concatcp;
use rand::seq::SliceRandom;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::fs::File;
use std::process::{self, Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const LOCAL_PORT: u32 = 8374;
const LOCAL_URL: &str = concatcp!("http://127.0.0.1:", LOCAL_PORT);

const VOTER_ID_HEADER: &str = "X-Voter-Id";
const ADMIN_ID: &str = "bench-admin";

#[rustfmt::skip]
const ROCKET_ENV: &[(&str, &str)] = &[
    ("ROCKET_PORT", concatcp!(LOCAL_PORT)),
    ("ROCKET_STORE", "memory"),
    ("ROCKET_ADMINS", concatcp!("[", ADMIN_ID, "]")),
];

#[rustfmt::skip]
const CANDIDATES: &[&str] = &[
    "Alice",
    "Bob",
    "Carol",
    "Dave",
    "Eve",
    "Fred",
    "Grace",
    "Henry",
    "Irene",
    "Joe",
];

#[derive(Parser)]
struct Args {
    /// Silence local server logging.
    #[arg(short, long)]
    quiet: bool,

    /// Send local server logging to this file; takes precedence over --quiet.
    #[arg(long)]
    logfile: Option<String>,

    /// Connect to a remote server at this URL instead of running a local one.
    /// The remote server must list `bench-admin` as an admin.
    #[arg(long)]
    remote: Option<String>,

    /// How many threads to use. Defaults to the number of logical CPUs.
    #[arg(long, default_value_t = num_cpus::get())]
    threads: usize,

    /// How many distinct voters each thread casts a vote for.
    #[arg(long, default_value_t = 100)]
    votes_per_thread: usize,
}

/// Construct a URL from segments.
macro_rules! url {
    ($($segment:expr),+) => {{
        std::path::PathBuf::from_iter([$($segment),+]).to_str().unwrap()
    }}
}

/// Build the server and set its environment.
fn setup_deps() -> anyhow::Result<()> {
    // Ensure the optimised build is up-to-date.
    Command::new("cargo")
        .args(["build", "--release"])
        .status()?
        .success()
        .then_some(())
        .ok_or_else(|| anyhow!("server build exited nonzero"))?;

    for (var, val) in ROCKET_ENV {
        env::set_var(var, val);
    }

    Ok(())
}

/// Terminate the given child process. This is a SIGTERM on unix and a hard-kill on other
/// platforms.
fn terminate_child(child: &mut Child) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let pid = nix::unistd::Pid::from_raw(child.id() as i32);
        nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM)?;
    }
    #[cfg(not(unix))]
    {
        child.kill()?;
    }
    Ok(())
}

/// Start the server and wait until it answers.
fn launch_server(logfile: Stdio) -> anyhow::Result<Child> {
    let mut proc = Command::new("./target/release/vote-ledger")
        .stdout(logfile)
        .spawn()?;

    let client = Client::new();
    loop {
        let resp = client
            .get(url!(LOCAL_URL, "candidates"))
            .send()
            .and_then(Response::error_for_status);

        if resp.is_ok() {
            break;
        }

        // Check the server didn't exit.
        if let Some(retcode) = proc.try_wait()? {
            return Err(anyhow!("Server exited prematurely with code {}", retcode));
        }
        thread::sleep(Duration::from_millis(50));
    }

    Ok(proc)
}

/// Start from a clean ledger holding only the benchmark candidates.
fn setup_candidates(url: &str) -> anyhow::Result<()> {
    let client = Client::new();

    client
        .post(url!(url, "reset"))
        .header(VOTER_ID_HEADER, ADMIN_ID)
        .send()
        .and_then(Response::error_for_status)?;
    client
        .put(url!(url, "settings/multi-vote"))
        .header(VOTER_ID_HEADER, ADMIN_ID)
        .json(&false)
        .send()
        .and_then(Response::error_for_status)?;
    client
        .put(url!(url, "settings/voting-open"))
        .header(VOTER_ID_HEADER, ADMIN_ID)
        .json(&true)
        .send()
        .and_then(Response::error_for_status)?;

    for name in CANDIDATES {
        let resp = client
            .post(url!(url, "candidates"))
            .header(VOTER_ID_HEADER, ADMIN_ID)
            .json(&json!({ "name": name }))
            .send()?;
        // A remote server may already know the candidate.
        if resp.status() != StatusCode::CONFLICT {
            resp.error_for_status()?;
        }
    }

    Ok(())
}

/// Cast a vote and return whether it was accepted.
fn cast_vote(client: &Client, url: &str, voter_id: &str, candidate: &str) -> anyhow::Result<bool> {
    let resp = client
        .post(url!(url, "votes"))
        .header(VOTER_ID_HEADER, voter_id)
        .json(&json!({ "candidate": candidate }))
        .send()?;
    match resp.status() {
        StatusCode::CONFLICT => Ok(false),
        _ => resp.error_for_status().map(|_| true).map_err(Into::into),
    }
}

/// Have every thread vote for its own set of voters, then report throughput.
/// Returns the number of accepted votes.
fn benchmark(url: &str, num_threads: usize, votes_per_thread: usize) -> anyhow::Result<usize> {
    let end_val: usize = num_threads * votes_per_thread;

    let start = Instant::now();
    let accepted = thread::scope(|s| {
        let mut threads = Vec::with_capacity(num_threads);

        for first in (0..end_val).step_by(votes_per_thread) {
            let t = s.spawn(move || {
                let client = Client::new();
                let mut duration = Duration::ZERO;
                let mut accepted = 0;

                for voter in first..(first + votes_per_thread) {
                    let candidate = CANDIDATES.choose(&mut rand::thread_rng()).unwrap();
                    let pre_cast = Instant::now();
                    if cast_vote(&client, url, &format!("voter-{voter}"), candidate)? {
                        accepted += 1;
                    }
                    duration += pre_cast.elapsed();
                }

                Ok::<_, anyhow::Error>((duration / votes_per_thread as u32, accepted))
            });
            threads.push(t);
        }

        let mut cast_duration = Duration::ZERO;
        let mut accepted = 0;
        for t in threads {
            let (dur, acc) = t.join().expect("thread panicked")?;
            cast_duration += dur;
            accepted += acc;
        }
        let total_duration = start.elapsed();

        let avg_cast_duration = cast_duration / num_threads as u32;
        // Theoretical votes per sec is 1/avg_duration * num_threads.
        let votes_per_sec = num_threads as f64 / avg_cast_duration.as_secs_f64();
        // Actual votes per sec is total_votes / total_time.
        let actual_votes_per_sec = end_val as f64 / total_duration.as_secs_f64();

        println!("cast: {:?} ({:.2}/s)", avg_cast_duration, votes_per_sec);
        println!(
            "actual duration: {} votes in {:?} ({:.2}/s)",
            end_val, total_duration, actual_votes_per_sec
        );

        Ok::<_, anyhow::Error>(accepted)
    })?;

    if accepted != end_val {
        return Err(anyhow!("only {accepted} of {end_val} distinct voters were accepted"));
    }
    Ok(accepted)
}

/// Race every thread to vote as the same voter; exactly one attempt may win.
fn duplicate_race(url: &str, num_threads: usize) -> anyhow::Result<()> {
    const ATTEMPTS_PER_THREAD: usize = 10;
    let accepted = AtomicUsize::new(0);

    thread::scope(|s| {
        let mut threads = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let accepted = &accepted;
            threads.push(s.spawn(move || {
                let client = Client::new();
                for j in 0..ATTEMPTS_PER_THREAD {
                    let candidate = CANDIDATES[(i + j) % CANDIDATES.len()];
                    if cast_vote(&client, url, "duplicate-voter", candidate)? {
                        accepted.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok::<_, anyhow::Error>(())
            }));
        }
        for t in threads {
            t.join().expect("thread panicked")?;
        }
        Ok::<_, anyhow::Error>(())
    })?;

    let accepted = accepted.into_inner();
    println!(
        "duplicate race: {accepted} of {} attempts accepted",
        num_threads * ATTEMPTS_PER_THREAD
    );
    if accepted != 1 {
        return Err(anyhow!("expected exactly one accepted duplicate, got {accepted}"));
    }
    Ok(())
}

/// Return `Ok(())` if the tally accounts for exactly `expected` votes.
fn verify(url: &str, expected: usize) -> anyhow::Result<()> {
    #[derive(Deserialize)]
    struct Tally {
        votes: usize,
    }

    let tally: Vec<Tally> = Client::new()
        .get(url!(url, "candidates"))
        .send()
        .and_then(Response::error_for_status)?
        .json()?;
    let total: usize = tally.iter().map(|t| t.votes).sum();

    println!("tally total: {total} (expected {expected})");
    if total != expected {
        return Err(anyhow!("tally total {total} does not match {expected} accepted votes"));
    }
    Ok(())
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let url = args.remote.as_deref().unwrap_or(LOCAL_URL);

    // If we're not connecting remotely, bring up a local server.
    let mut proc: Option<Child> = None;
    if args.remote.is_none() {
        setup_deps()?;
        let logfile = match args.logfile {
            Some(path) => Stdio::from(File::create(path)?),
            None => {
                if args.quiet {
                    Stdio::null()
                } else {
                    Stdio::inherit()
                }
            }
        };
        proc = Some(launch_server(logfile)?);
    }

    // Use a closure to ensure the cleanup below runs.
    let result = (|| {
        setup_candidates(url)?;
        let accepted = benchmark(url, args.threads, args.votes_per_thread)?;
        duplicate_race(url, args.threads)?;
        verify(url, accepted + 1)
    })();

    // Kill the server.
    if let Some(p) = proc.as_mut() {
        terminate_child(p)?;
        p.wait()?;
    }

    result
}

fn main() {
    if let Err(e) = run() {
        eprintln!("FATAL: {}", e);
        process::exit(1);
    }
}
