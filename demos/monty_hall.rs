//! The Monty Hall problem as a three node network, queried and then re-fit from simulated games.

use quince::inference::Evidence;
use quince::variable::Symbol;
use quince::{
    BayesianNetwork, BayesianNetworkBuilder, Categorical, ConditionalTable, DomainPolicy,
    SharedDistribution, State, Value,
};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

const DOORS: [&str; 3] = ["A", "B", "C"];

fn main() -> quince::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let model = build_model()?;

    /////////////////////////////////////////////////////
    // Step 1: The guest picks A and Monty opens B
    let mut evidence = Evidence::new();
    evidence.insert(String::from("guest"), Symbol::from("A"));
    evidence.insert(String::from("monty"), Symbol::from("B"));

    let beliefs = model.predict_proba(&evidence)?;
    if let Some(prize) = beliefs.get("prize") {
        for door in DOORS.iter() {
            println!("P(prize = {} | guest = A, monty = B) = {:.4}", door, prize.probability(&Symbol::from(*door)));
        }
    }

    /////////////////////////////////////////////////////
    // Step 2: Simulate games and re-fit every table from them
    let mut rng = StdRng::seed_from_u64(7);
    let mut games = Vec::new();
    for _ in 0..1000 {
        let game: Vec<Value> = model.sample(&mut rng)?.into_iter().map(Value::from).collect();
        games.push(game);
    }

    model.fit_with(&games, None, 0.0, DomainPolicy::Strict)?;
    let refit = model.predict_proba(&evidence)?;
    if let Some(prize) = refit.get("prize") {
        println!("after fitting 1000 games: P(prize = C | e) = {:.4}", prize.probability(&Symbol::from("C")));
    }

    Ok(())
}

fn build_model() -> quince::Result<BayesianNetwork> {
    let guest = SharedDistribution::new(Categorical::uniform(DOORS.to_vec())?);
    let prize = SharedDistribution::new(Categorical::uniform(DOORS.to_vec())?);

    let mut rows = Vec::new();
    for g in DOORS.iter() {
        for z in DOORS.iter() {
            for m in DOORS.iter() {
                // Monty never opens the guest's door or the prize door
                let p = if m == g || m == z {
                    0.0
                } else if g == z {
                    0.5
                } else {
                    1.0
                };
                rows.push((vec![*g, *z, *m], p));
            }
        }
    }
    let monty = SharedDistribution::new(ConditionalTable::new(rows, vec![guest.clone(), prize.clone()])?);

    BayesianNetworkBuilder::new("monty hall")
        .with_state(State::new(guest, "guest"))
        .with_state(State::new(prize, "prize"))
        .with_state(State::new(monty, "monty"))
        .with_edge("guest", "monty")
        .with_edge("prize", "monty")
        .bake()
}
