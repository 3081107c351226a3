use clap::Parser;
use itertools::Itertools;
use rayon::prelude::*;
use rspr::approx::{approximate, ApproxOptions};
use rspr::cluster::decompose_and_solve;
use rspr::forest::{sync_twins, Forest};
use rspr::labels::LabelMap;
use rspr::newick::parse_tree;
use rspr::search::{exact, solve, solve_all, Config, Exact};
use rspr::tree::Tree;
use std::io::{self, BufRead};
use std::time::Instant;

/// Calculate approximate and exact Subtree Prune and Regraft (rSPR)
/// distances and the associated maximum agreement forests (MAFs) between
/// pairs of rooted binary trees read from STDIN in Newick format.
#[derive(Parser, Debug)]
#[command(name = "rspr", version, about = "rSPR distances and maximum agreement forests")]
struct Args {
    /// Calculate the exact distance with the branch-and-bound FPT
    /// algorithm (the default)
    #[arg(long = "bb")]
    bb: bool,

    /// Calculate the exact distance with the plain FPT algorithm
    /// (no approximation-based pruning)
    #[arg(long = "fpt")]
    fpt: bool,

    /// Calculate just the linear-time 3-approximation
    #[arg(long = "approx")]
    approx_only: bool,

    /// Use the quadratic-time component check for a potentially better
    /// approximation
    #[arg(long = "cc")]
    cc: bool,

    /// Use 3-way branching for all FPT algorithms
    #[arg(long = "noopt")]
    noopt: bool,

    /// Use "cut one b" improved branching
    #[arg(long = "cob")]
    cob: bool,

    /// Use "cut all b" improved branching
    #[arg(long = "cab")]
    cab: bool,

    /// Use "separate components" improved branching
    #[arg(long = "sc")]
    sc: bool,

    /// Compare the first input tree against every rooting of each other
    /// input tree and report the best distance found
    #[arg(long = "unrooted")]
    unrooted: bool,

    /// As --unrooted, but run the exact search only on the rooting with
    /// the minimum approximate distance
    #[arg(long = "unrooted-min-approx")]
    unrooted_min_approx: bool,

    /// Solve through cluster decomposition, optionally capped at N
    /// clusters (implies --prefer-rho)
    #[arg(long = "cluster", value_name = "N", num_args = 0..=1, default_missing_value = "1000")]
    cluster: Option<usize>,

    /// Prefer resolving the root-remnant component first
    #[arg(long = "prefer-rho")]
    prefer_rho: bool,

    /// Memoize searched forest states
    #[arg(long = "memoize")]
    memoize: bool,

    /// Enumerate all maximum agreement forests of minimum size
    #[arg(long = "all-mafs")]
    all_mafs: bool,

    /// Quiet; do not echo the input trees or the approximation
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

impl Args {
    fn config(&self) -> Config {
        // Naming any optimization explicitly selects just that subset;
        // --noopt alone turns them all off.
        let defaults = !(self.noopt || self.cob || self.cab || self.sc);
        Config {
            use_cut_one_b: self.cob || defaults,
            use_cut_all_b: self.cab || defaults,
            use_separate_components: self.sc || defaults,
            use_memoization: self.memoize,
            prefer_rho: self.prefer_rho || self.cluster.is_some(),
            all_mafs: self.all_mafs,
            branch_bound: !self.fpt,
            max_clusters: self.cluster,
        }
    }

    fn wants_exact(&self) -> bool {
        !self.approx_only
    }

    fn exact_label(&self) -> &'static str {
        if self.fpt { "exact drSPR" } else { "exact BB drSPR" }
    }
}

fn main() {
    let args = Args::parse();
    let stdin = io::stdin();
    let lines: Vec<String> = stdin
        .lock()
        .lines()
        .map_while(Result::ok)
        .filter(|l| !l.trim().is_empty())
        .collect();

    if args.unrooted || args.unrooted_min_approx {
        run_unrooted(&args, &lines);
    } else {
        run_pairs(&args, &lines);
    }
}

/// Normal operation: consume the input two trees at a time.
fn run_pairs(args: &Args, lines: &[String]) {
    let cfg = args.config();
    for (l1, l2) in lines.iter().tuples() {
        let t0 = Instant::now();
        let mut labels = LabelMap::new();
        let (t1, t2) = match (parse_tree(l1, &mut labels), parse_tree(l2, &mut labels)) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => {
                eprintln!("Failed to parse input tree: {e}");
                std::process::exit(2);
            }
        };
        log_if(!args.quiet, format!("T1: {}", t1.newick(&labels)));
        log_if(!args.quiet, format!("T2: {}", t2.newick(&labels)));
        log_if(!args.quiet, String::new());

        // Approximation first: it prints the bound and its witness forest.
        let mut fa = Forest::from_tree(&t1);
        let mut fb = Forest::from_tree(&t2);
        if let Err(e) = sync_twins(&mut fa, &mut fb) {
            eprintln!("Input trees are incompatible: {e}");
            std::process::exit(2);
        }
        let bound = approximate(&mut fa, &mut fb, ApproxOptions { quadratic: args.cc });
        if !(args.quiet && args.wants_exact()) {
            println!("F1: {}", fa.components_string(&labels));
            println!("F2: {}", fb.components_string(&labels));
            println!("approx drSPR={bound}");
            println!();
        }

        if args.wants_exact() {
            if args.cluster.is_some() {
                run_clustered(args, &cfg, &t1, &t2, &mut labels);
            } else if args.all_mafs {
                run_all_mafs(args, &cfg, &t1, &t2, &labels);
            } else {
                let mut fa = Forest::from_tree(&t1);
                let mut fb = Forest::from_tree(&t2);
                sync_twins(&mut fa, &mut fb).expect("leaf sets already checked");
                let d = solve(&mut fa, &mut fb, &cfg);
                println!("F1: {}", fa.components_string(&labels));
                println!("F2: {}", fb.components_string(&labels));
                println!("{}={d}", args.exact_label());
                println!();
            }
        }
        log_if(!args.quiet, format!("pair done in {:.3}s", t0.elapsed().as_secs_f64()));
    }
}

fn run_clustered(args: &Args, cfg: &Config, t1: &Tree, t2: &Tree, labels: &mut LabelMap) {
    let dec = decompose_and_solve(t1, t2, labels, cfg);
    if dec.fell_back {
        log_if(!args.quiet, "cluster limit exceeded; solving whole instance".to_string());
    } else {
        for (i, d) in dec.cluster_distances.iter().enumerate() {
            log_if(!args.quiet, format!("cluster C{} exact drSPR={d}", i + 1));
        }
    }
    println!("F1: {}", dec.forest_a.components_string(labels));
    println!("F2: {}", dec.forest_b.components_string(labels));
    println!("total {}={}", args.exact_label(), dec.distance);
    println!();
}

fn run_all_mafs(args: &Args, cfg: &Config, t1: &Tree, t2: &Tree, labels: &LabelMap) {
    let mut fa = Forest::from_tree(t1);
    let mut fb = Forest::from_tree(t2);
    sync_twins(&mut fa, &mut fb).expect("leaf sets already checked");
    let (d, mafs) = solve_all(&mut fa, &mut fb, cfg, labels);
    for (w1, w2) in &mafs {
        println!("F1: {w1}");
        println!("F2: {w2}");
        println!();
    }
    println!("{} MAFs of size {}", mafs.len(), d + 1);
    println!("{}={d}", args.exact_label());
    println!();
}

/// Unrooted comparison: the first tree against every rooting of each other
/// input tree. Rootings are independent instances, so the scan over them
/// is dispatched to the rayon pool, one forest pair per worker.
fn run_unrooted(args: &Args, lines: &[String]) {
    let cfg = args.config();
    let mut labels = LabelMap::new();
    let mut trees = lines.iter().map(|l| parse_tree(l, &mut labels));
    let Some(Ok(t1)) = trees.next() else {
        eprintln!("No valid first tree on stdin");
        std::process::exit(2);
    };
    let others: Vec<Tree> = match trees.collect::<Result<_, _>>() {
        Ok(ts) => ts,
        Err(e) => {
            eprintln!("Failed to parse input tree: {e}");
            std::process::exit(2);
        }
    };
    log_if(!args.quiet, format!("T1: {}", t1.newick(&labels)));

    let rootings: Vec<Tree> = others.iter().flat_map(|t| t.rootings()).collect();
    if rootings.is_empty() {
        eprintln!("No candidate rootings to compare against");
        std::process::exit(2);
    }

    // Reported bound honors --cc; the budget seed always comes from the
    // linear bound, which alone guarantees ⌊B/3⌋ ≤ distance.
    let approxes: Vec<(usize, usize)> = rootings
        .par_iter()
        .map(|r| {
            let mut fa = Forest::from_tree(&t1);
            let mut fb = Forest::from_tree(r);
            sync_twins(&mut fa, &mut fb).expect("trees share a leaf set");
            let linear = approximate(&mut fa, &mut fb, ApproxOptions::default());
            let shown = if args.cc {
                let mut fa = Forest::from_tree(&t1);
                let mut fb = Forest::from_tree(r);
                sync_twins(&mut fa, &mut fb).expect("trees share a leaf set");
                approximate(&mut fa, &mut fb, ApproxOptions { quadratic: true })
            } else {
                linear
            };
            (shown, linear)
        })
        .collect();
    let (min_i, &(min_approx, _)) = approxes
        .iter()
        .enumerate()
        .min_by_key(|&(_, &(shown, _))| shown)
        .expect("at least one rooting");
    log_if(!args.quiet, format!("min approx drSPR={min_approx}"));

    if !args.wants_exact() {
        return;
    }

    let candidates: Vec<&Tree> = if args.unrooted_min_approx {
        vec![&rootings[min_i]]
    } else {
        rootings.iter().collect()
    };

    // Scan budgets upward; at each budget every candidate rooting is an
    // independent bounded query.
    let mut k = approxes
        .iter()
        .map(|&(_, linear)| linear / 3)
        .min()
        .expect("at least one rooting");
    let (best, d) = loop {
        let hit = candidates.par_iter().find_map_any(|&r| {
            let mut fa = Forest::from_tree(&t1);
            let mut fb = Forest::from_tree(r);
            sync_twins(&mut fa, &mut fb).expect("trees share a leaf set");
            match exact(&mut fa, &mut fb, k, &cfg) {
                Exact::Solved(d) => Some((r, d)),
                Exact::Infeasible => None,
            }
        });
        match hit {
            Some(found) => break found,
            None => k += 1,
        }
    };

    let mut fa = Forest::from_tree(&t1);
    let mut fb = Forest::from_tree(best);
    sync_twins(&mut fa, &mut fb).expect("trees share a leaf set");
    let d2 = solve(&mut fa, &mut fb, &cfg);
    debug_assert_eq!(d, d2);
    log_if(!args.quiet, format!("T2: {}", best.newick(&labels)));
    println!("F1: {}", fa.components_string(&labels));
    println!("F2: {}", fb.components_string(&labels));
    println!("{}={d2}", args.exact_label());
}

fn log_if(show: bool, msg: String) {
    if show {
        println!("{}", msg);
    }
}
