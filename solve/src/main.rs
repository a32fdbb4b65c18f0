use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use pomdp::{
    model::{pomdp::Pomdp, ModelError},
    parse::{self, ParseError},
    solver::{
        cached::CachedValueIteration,
        vi::ValueIteration,
        Config,
        MaxOperator,
        SolveError,
        Solver,
        TOLERANCE,
    },
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Method {
    /// Plain value iteration
    Vi,
    /// Value iteration which also caches a running maximum per state
    Cached,
}

#[derive(Parser, Debug)]
struct Args {
    /// Path to a problem in `.POMDP` format
    #[arg(long, conflicts_with = "random", required_unless_present = "random")]
    problem: Option<PathBuf>,
    /// Solve a random instance of this size instead
    #[arg(long, num_args = 3, value_names = ["STATES", "ACTIONS", "OBSERVATIONS"])]
    random: Option<Vec<usize>>,
    /// Discount factor of random instances
    #[arg(long, default_value_t = 0.95)]
    discount: f64,
    /// Seed for random instances and noise, drawn at random if not given
    #[arg(long)]
    seed: Option<u64>,
    /// Perturb transition probabilities by up to this much before solving
    #[arg(long)]
    noise: Option<f64>,
    #[arg(long, value_enum, default_value_t = Method::Vi)]
    solver: Method,
    /// Stop once no action value changes by more than this
    #[arg(long, default_value_t = TOLERANCE)]
    tolerance: f64,
    /// Give up after this many sweeps
    #[arg(long)]
    max_sweeps: Option<usize>,
    /// Never let a state value drop below zero
    #[arg(long)]
    zero_floor: bool,
    /// Also print the greedy action of every state
    #[arg(long)]
    policy: bool,
}

#[derive(Error, Debug)]
enum Error {
    #[error("pass either --problem or --random")]
    NoProblem,
    #[error("noise scalar {0} must be finite and non-negative")]
    InvalidNoise(f64),
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Model(#[from] ModelError),
    #[error("{0}")]
    Solve(#[from] SolveError),
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(err) = run(&args) {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let seed = args.seed.unwrap_or_else(|| rand::thread_rng().gen());
    log::info!("seed: {seed}");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut pomdp = match (&args.problem, args.random.as_deref()) {
        (Some(path), _) => parse::load(path)?,
        (None, Some(&[states, actions, observations])) => {
            Pomdp::random(states, actions, observations, args.discount, &mut rng)?
        }
        _ => return Err(Error::NoProblem),
    };
    log::info!("solving {}", pomdp.mdp().name());

    if let Some(scalar) = args.noise {
        if !scalar.is_finite() || scalar < 0.0 {
            return Err(Error::InvalidNoise(scalar));
        }
        pomdp.add_transition_noise(&mut rng, scalar)?;
    }

    let config = Config {
        tolerance: args.tolerance,
        max_sweeps: args.max_sweeps,
        max_operator: if args.zero_floor {
            MaxOperator::ZeroFloored
        } else {
            MaxOperator::Exact
        },
    };
    let solution = match args.solver {
        Method::Vi => ValueIteration::new(&pomdp, config)?.solve()?.clone(),
        Method::Cached => {
            let mut solver = CachedValueIteration::new(&pomdp, config)?;
            let solution = solver.solve()?.clone();
            log::debug!("running maxima: {:?}", solver.state_values());
            solution
        }
    };
    println!("{solution}");

    if args.policy {
        println!();
        for (state, action) in solution.q_table.policy().into_iter().enumerate() {
            println!("{state}: {}", pomdp.mdp().action_label(action));
        }
    }
    Ok(())
}
