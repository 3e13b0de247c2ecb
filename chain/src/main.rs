// chain/src/main.rs
//
// The peer binary. Wires up the chain library:
//
// - per-peer log file (`<port>_log.txt`) via tracing-subscriber
// - node config from the CLI difficulty plus the optional JSON file
// - the peer node itself (acceptor, receive-processor, miner)
// - the optional scenario file, then the interactive menu.
//
// Usage:
//   peer <listening_port> <tracker_host> <tracker_port>
//        [<difficulty>] [<config_path>] [<scenario_path>]

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use chain::app;
use chain::{DEFAULT_DIFFICULTY, NodeConfig, Peer};

struct Args {
    listening_port: u16,
    tracker_host: String,
    tracker_port: u16,
    difficulty: usize,
    config_path: Option<PathBuf>,
    scenario_path: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        return Err(
            "usage: peer <listening_port> <tracker_host> <tracker_port> \
             [<difficulty>] [<config_path>] [<scenario_path>]"
                .to_string(),
        );
    }

    let listening_port = args[0]
        .parse::<u16>()
        .map_err(|_| format!("bad listening port: {}", args[0]))?;
    let tracker_host = args[1].clone();
    let tracker_port = args[2]
        .parse::<u16>()
        .map_err(|_| format!("bad tracker port: {}", args[2]))?;

    let difficulty = match args.get(3) {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| format!("bad difficulty: {raw}"))?,
        None => DEFAULT_DIFFICULTY,
    };

    Ok(Args {
        listening_port,
        tracker_host,
        tracker_port,
        difficulty,
        config_path: args.get(4).map(PathBuf::from),
        scenario_path: args.get(5).map(PathBuf::from),
    })
}

#[tokio::main]
async fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(1);
        }
    };

    // The per-peer log file is opened for the process lifetime; failing
    // to open it is a fatal local resource error.
    let log_path = format!("{}_log.txt", args.listening_port);
    let log_file = match std::fs::File::create(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("cannot open log file {log_path}: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();

    if let Err(err) = run(args).await {
        eprintln!("fatal error: {err}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), String> {
    let mut config = NodeConfig::new(args.difficulty);
    if let Some(path) = &args.config_path {
        config.apply_file(path).map_err(|e| e.to_string())?;
    }

    println!(
        "starting peer on port {} (difficulty {}), tracker {}:{}",
        args.listening_port, args.difficulty, args.tracker_host, args.tracker_port
    );

    let peer = Peer::start(
        args.listening_port,
        &args.tracker_host,
        args.tracker_port,
        config,
    )
    .await
    .map_err(|e| e.to_string())?;

    println!("peer is up; chain height {}", peer.snapshot_chain().await.len());

    if let Some(path) = &args.scenario_path {
        println!("running scenario {}", path.display());
        app::run_scenario(&peer, path)
            .await
            .map_err(|e| format!("scenario {} failed: {e}", path.display()))?;
    }

    interactive_menu(&peer).await;

    println!("shutting down...");
    peer.shutdown().await;
    println!("closed successfully");
    Ok(())
}

type StdinLines = Lines<BufReader<Stdin>>;

async fn prompt(lines: &mut StdinLines, text: &str) -> Option<String> {
    print!("{text}");
    std::io::stdout().flush().ok();
    match lines.next_line().await {
        Ok(Some(line)) => Some(line.trim().to_string()),
        _ => None,
    }
}

const MENU: &str = "-------------------------------------------\n\
    Pick an option:\n \
    1. Create poll\n \
    2. Display available polls\n \
    3. Vote for a poll\n \
    4. See poll results\n \
    5. Quit\n";

/// Drives the peer from stdin until quit, EOF, or Ctrl-C.
async fn interactive_menu(peer: &Peer) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("{MENU}");
        let choice = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => line.trim().to_string(),
                // stdin is gone (scenario-driven run); park until Ctrl-C.
                Ok(None) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
                Err(_) => return,
            }
        };

        match choice.as_str() {
            "1" => menu_create_poll(peer, &mut lines).await,
            "2" => menu_list_polls(peer).await,
            "3" => menu_vote(peer, &mut lines).await,
            "4" => menu_results(peer, &mut lines).await,
            "5" => return,
            _ => println!("You must provide a valid integer between 1 and 5!"),
        }
    }
}

async fn menu_create_poll(peer: &Peer, lines: &mut StdinLines) {
    let Some(poll_name) = prompt(lines, "Enter poll name: ").await else {
        return;
    };
    if poll_name.is_empty() {
        println!("Poll name cannot be empty!");
        return;
    }

    let chain = peer.snapshot_chain().await;
    if app::find_poll_by_name(&chain, &poll_name).is_some() {
        println!("Poll name already exists!");
        return;
    }

    let Some(count_raw) = prompt(lines, "How many poll options do you want? ").await else {
        return;
    };
    let Ok(count) = count_raw.parse::<usize>() else {
        println!("Enter a valid number!");
        return;
    };
    if count < 2 {
        println!("A poll needs at least 2 options!");
        return;
    }

    let mut options: Vec<String> = Vec::with_capacity(count);
    while options.len() < count {
        let Some(option) = prompt(lines, "Enter poll option: ").await else {
            return;
        };
        if option.is_empty() || options.contains(&option) {
            println!("This option is empty or already added, add another option!");
            continue;
        }
        options.push(option);
    }

    let poll_id = app::create_poll(peer, &poll_name, options).await;
    println!("Submitted transaction for poll {poll_name} ({poll_id})");
}

async fn menu_list_polls(peer: &Peer) {
    let chain = peer.snapshot_chain().await;
    let polls = app::all_polls(&chain);
    if polls.is_empty() {
        println!("No available polls right now");
        return;
    }
    for poll in polls {
        println!("Poll name: {}", poll.poll_name);
        println!("Options: {:?}\n", poll.options);
    }
}

async fn menu_vote(peer: &Peer, lines: &mut StdinLines) {
    let Some(poll_name) = prompt(lines, "Which poll do you want to vote for? ").await else {
        return;
    };

    let chain = peer.snapshot_chain().await;
    let Some(poll) = app::find_poll_by_name(&chain, &poll_name) else {
        println!("Poll {poll_name} does not exist!");
        return;
    };

    println!("Here are the available options for {poll_name}:");
    for (i, option) in poll.options.iter().enumerate() {
        println!("{}: {option}", i + 1);
    }

    let Some(option) = prompt(lines, "Which option do you want to vote for? ").await else {
        return;
    };
    if !poll.options.contains(&option) {
        println!("Enter a valid option!");
        return;
    }

    app::vote(peer, &poll.poll_id, &option).await;
    println!("Submitted transaction voting {option} on {poll_name}");
}

async fn menu_results(peer: &Peer, lines: &mut StdinLines) {
    let Some(poll_name) = prompt(lines, "Which poll do you want to see? ").await else {
        return;
    };

    let chain = peer.snapshot_chain().await;
    let Some(poll) = app::find_poll_by_name(&chain, &poll_name) else {
        println!("Poll {poll_name} does not exist!");
        return;
    };

    match app::poll_results(&chain, &poll.poll_id) {
        Some(results) => {
            println!("Results for {poll_name}:");
            for (option, count) in results {
                println!("  {option}: {count}");
            }
        }
        None => println!("Poll {poll_name} does not exist!"),
    }
}
