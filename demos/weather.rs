//! Decode, sample and train the rainy/sunny weather model.
//!
//! Run with `RUST_LOG=debug` to follow the training passes.

use quince::estimators::TrainingConfig;
use quince::{Categorical, HiddenMarkovModel, HiddenMarkovModelBuilder, State, Value};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

fn main() -> quince::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    /////////////////////////////////////////////////////
    // Step 1: Build the model
    let mut model = build_model()?;

    /////////////////////////////////////////////////////
    // Step 2: Score and decode an observed week
    let week: Vec<Value> = ["walk", "shop", "clean", "clean", "walk"]
        .iter()
        .map(|&w| Value::from(w))
        .collect();

    println!("P(week) = {:.6}", model.log_probability(&week)?.exp());

    let best = model.viterbi(&week)?;
    let names: Vec<&str> = best.path.iter().map(|&i| model.states()[i].name()).collect();
    println!("viterbi ({:.4}): {}", best.log_probability, names.join(" -> "));

    let fb = model.forward_backward(&week)?;
    for (t, day) in fb.emissions.rows().into_iter().enumerate() {
        println!("day {}: P(Rainy) = {:.4}  P(Sunny) = {:.4}", t, day[0].exp(), day[1].exp());
    }

    /////////////////////////////////////////////////////
    // Step 3: Sample some weeks and train on them
    let mut rng = StdRng::seed_from_u64(2024);
    let mut weeks = Vec::new();
    for _ in 0..20 {
        weeks.push(model.sample(&mut rng, Some(7))?.emissions);
    }

    let report = model.fit_with(&weeks, None, &TrainingConfig::default())?;
    println!(
        "trained in {} iterations: {:.4} -> {:.4}",
        report.iterations, report.initial_log_probability, report.final_log_probability
    );
    println!("{:.3}", model.dense_transition_matrix());

    Ok(())
}

fn build_model() -> quince::Result<HiddenMarkovModel> {
    let rainy = Categorical::new(vec![("walk", 0.1), ("shop", 0.4), ("clean", 0.5)])?;
    let sunny = Categorical::new(vec![("walk", 0.6), ("shop", 0.3), ("clean", 0.1)])?;

    HiddenMarkovModelBuilder::new("weather")
        .with_state(State::new(rainy, "Rainy"))
        .with_state(State::new(sunny, "Sunny"))
        .with_start_transition("Rainy", 0.6)
        .with_start_transition("Sunny", 0.4)
        .with_transition("Rainy", "Rainy", 0.65)
        .with_transition("Rainy", "Sunny", 0.25)
        .with_transition("Sunny", "Rainy", 0.35)
        .with_transition("Sunny", "Sunny", 0.55)
        .with_end_transition("Rainy", 0.1)
        .with_end_transition("Sunny", 0.1)
        .bake()
}
