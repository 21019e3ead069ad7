//! Classify DNA fragments with one hidden Markov model per class.

use quince::{Categorical, HiddenMarkovModel, HiddenMarkovModelBuilder, NaiveBayes, State, Value};

use tracing_subscriber::EnvFilter;

fn main() -> quince::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let background = build_model("background", [0.25, 0.25, 0.25, 0.25])?;
    let island = build_model("island", [0.1, 0.4, 0.4, 0.1])?;
    let mut nb = NaiveBayes::new(vec![background, island])?;

    let train = ["ACGTTAGCAT", "TTATAGCATA", "GCGCGCCGCG", "CGCGGCGACG", "ATATTACG"];
    let labels = [0, 0, 1, 1, 0];
    let rows: Vec<Vec<Value>> = train.iter().map(|s| dna(s)).collect();
    nb.fit(&rows, &labels, None)?;
    println!("priors after fitting: {:?}", nb.priors());

    let test = ["GCGGCCGC", "TATATTAA", "ACGCGTTA"];
    let rows: Vec<Vec<Value>> = test.iter().map(|s| dna(s)).collect();
    let p = nb.predict_proba(&rows)?;
    for (seq, posterior) in test.iter().zip(p.rows()) {
        println!("{}: P(background) = {:.4}  P(island) = {:.4}", seq, posterior[0], posterior[1]);
    }

    Ok(())
}

fn dna(s: &str) -> Vec<Value> {
    s.chars().map(Value::from).collect()
}

fn build_model(name: &str, p: [f64; 4]) -> quince::Result<HiddenMarkovModel> {
    let emissions = Categorical::new(vec![('A', p[0]), ('C', p[1]), ('G', p[2]), ('T', p[3])])?;

    HiddenMarkovModelBuilder::new(name)
        .with_state(State::new(emissions, "emit"))
        .with_start_transition("emit", 1.0)
        .with_transition("emit", "emit", 0.9)
        .bake()
}
