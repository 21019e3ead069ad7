//! Query the Asia chest clinic network with exact and loopy inference.

use quince::inference::{BeliefConfig, Evidence};
use quince::variable::Symbol;
use quince::{
    BayesianNetwork, BayesianNetworkBuilder, Categorical, ConditionalTable, SharedDistribution,
    State,
};

use tracing_subscriber::EnvFilter;

fn main() -> quince::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    /////////////////////////////////////////////////////
    // Step 1: Build the model
    let model = build_model()?;

    /////////////////////////////////////////////////////
    // Step 2: Compile some evidence
    let mut evidence = Evidence::new();
    evidence.insert(String::from("tuberculosis"), Symbol::from("True"));
    evidence.insert(String::from("smoker"), Symbol::from("False"));
    evidence.insert(String::from("bronchitis"), Symbol::from("True"));

    /////////////////////////////////////////////////////
    // Step 3: Run the query both ways
    let exact = model.predict_proba(&evidence)?;
    let loopy = model.predict_proba_with(
        &evidence,
        &BeliefConfig { max_exact_table_size: 0, ..BeliefConfig::default() }
    )?;
    println!("exact: {:?}, loopy: {:?}", exact.convergence, loopy.convergence);

    for (name, marginal) in exact.marginals.iter() {
        let t = Symbol::from("True");
        let other = loopy.get(name).map(|m| m.probability(&t)).unwrap_or(f64::NAN);
        println!("P({} = True | e) = {:.4} (loopy {:.4})", name, marginal.probability(&t), other);
    }

    Ok(())
}

fn table(rows: Vec<(Vec<&str>, f64)>, parents: Vec<SharedDistribution>) -> quince::Result<SharedDistribution> {
    Ok(SharedDistribution::new(ConditionalTable::new(rows, parents)?))
}

fn build_model() -> quince::Result<BayesianNetwork> {
    ///////////////////////////////////////////////////
    // Step 1: Roots
    let asia = SharedDistribution::new(Categorical::new(vec![("True", 0.5), ("False", 0.5)])?);
    let smoking = SharedDistribution::new(Categorical::new(vec![("True", 0.5), ("False", 0.5)])?);

    ///////////////////////////////////////////////////
    // Step 2: Build CPTs for variables with parents
    let tuberculosis = table(vec![
        (vec!["True", "True"], 0.2), (vec!["True", "False"], 0.8),
        (vec!["False", "True"], 0.01), (vec!["False", "False"], 0.99),
    ], vec![asia.clone()])?;
    let lung = table(vec![
        (vec!["True", "True"], 0.75), (vec!["True", "False"], 0.25),
        (vec!["False", "True"], 0.02), (vec!["False", "False"], 0.98),
    ], vec![smoking.clone()])?;
    let bronchitis = table(vec![
        (vec!["True", "True"], 0.92), (vec!["True", "False"], 0.08),
        (vec!["False", "True"], 0.03), (vec!["False", "False"], 0.97),
    ], vec![smoking.clone()])?;
    let either = table(vec![
        (vec!["True", "True", "True"], 1.0), (vec!["True", "True", "False"], 0.0),
        (vec!["True", "False", "True"], 1.0), (vec!["True", "False", "False"], 0.0),
        (vec!["False", "True", "True"], 1.0), (vec!["False", "True", "False"], 0.0),
        (vec!["False", "False", "True"], 0.0), (vec!["False", "False", "False"], 1.0),
    ], vec![tuberculosis.clone(), lung.clone()])?;
    let xray = table(vec![
        (vec!["True", "True"], 0.885), (vec!["True", "False"], 0.115),
        (vec!["False", "True"], 0.04), (vec!["False", "False"], 0.96),
    ], vec![either.clone()])?;
    let dyspnea = table(vec![
        (vec!["True", "True", "True"], 0.96), (vec!["True", "True", "False"], 0.04),
        (vec!["True", "False", "True"], 0.89), (vec!["True", "False", "False"], 0.11),
        (vec!["False", "True", "True"], 0.96), (vec!["False", "True", "False"], 0.04),
        (vec!["False", "False", "True"], 0.89), (vec!["False", "False", "False"], 0.11),
    ], vec![either.clone(), bronchitis.clone()])?;

    ///////////////////////////////////////////////////
    // Step 3: Wire the network
    BayesianNetworkBuilder::new("asia")
        .with_state(State::new(asia, "asia"))
        .with_state(State::new(tuberculosis, "tuberculosis"))
        .with_state(State::new(smoking, "smoker"))
        .with_state(State::new(lung, "cancer"))
        .with_state(State::new(bronchitis, "bronchitis"))
        .with_state(State::new(either, "TvC"))
        .with_state(State::new(xray, "xray"))
        .with_state(State::new(dyspnea, "dyspnea"))
        .with_edge("asia", "tuberculosis")
        .with_edge("tuberculosis", "TvC")
        .with_edge("smoker", "cancer")
        .with_edge("smoker", "bronchitis")
        .with_edge("cancer", "TvC")
        .with_edge("TvC", "xray")
        .with_edge("TvC", "dyspnea")
        .with_edge("bronchitis", "dyspnea")
        .bake()
}
