use quince::{
    BayesianNetwork, BayesianNetworkBuilder, Categorical, ConditionalTable, HiddenMarkovModel,
    HiddenMarkovModelBuilder, Model, NaiveBayes, QuinceError, Schema, SharedDistribution, State,
    Value,
};

fn coin(name: &str, heads: f64) -> HiddenMarkovModel {
    let d = Categorical::new(vec![("H", heads), ("T", 1.0 - heads)]).unwrap();
    HiddenMarkovModelBuilder::new(name)
        .with_state(State::new(d, "flip"))
        .with_start_transition("flip", 1.0)
        .with_transition("flip", "flip", 0.8)
        .bake()
        .unwrap()
}

fn flips(s: &str) -> Vec<Value> {
    s.chars().map(|c| Value::from(c.to_string())).collect()
}

#[test]
fn sequence_classes() {
    let nb = NaiveBayes::new(vec![coin("fair", 0.5), coin("loaded", 0.9)]).unwrap();
    assert_eq!(nb.schema(), &Schema::Sequence);

    let rows = vec![flips("HHHHHHHH"), flips("HTTHTTHT"), flips("T"), flips("HHHTHHHH")];
    let p = nb.predict_proba(&rows).unwrap();
    for row in p.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-9);
    }
    assert_eq!(nb.predict(&rows).unwrap(), vec![1, 0, 0, 1]);

    // the shared end transition cancels, leaving the emission odds
    let odds = (0.5f64 / 0.9).powi(8);
    assert!((p[[0, 0]] - odds / (1.0 + odds)).abs() < 1e-9);
}

#[test]
fn sequence_classes_refit() {
    let mut nb = NaiveBayes::new(vec![coin("a", 0.5), coin("b", 0.5)]).unwrap();
    let rows = vec![flips("HHHHH"), flips("HHHTH"), flips("TTTTT"), flips("TTHTT"), flips("TTTT")];

    nb.fit(&rows, &[0, 0, 1, 1, 1], None).unwrap();

    let priors = nb.priors();
    assert!((priors[0] - 0.4).abs() < 1e-9);
    assert!((priors[1] - 0.6).abs() < 1e-9);
    assert_eq!(nb.predict(&[flips("HHH"), flips("TTT")]).unwrap(), vec![0, 1]);
}

fn network(name: &str, rain: f64) -> BayesianNetwork {
    let r = SharedDistribution::new(Categorical::new(vec![("yes", rain), ("no", 1.0 - rain)]).unwrap());
    let w = SharedDistribution::new(
        ConditionalTable::new(
            vec![
                (vec!["yes", "yes"], 0.9),
                (vec!["yes", "no"], 0.1),
                (vec!["no", "yes"], 0.2),
                (vec!["no", "no"], 0.8),
            ],
            vec![r.clone()]
        ).unwrap()
    );

    BayesianNetworkBuilder::new(name)
        .with_state(State::new(r, "rain"))
        .with_state(State::new(w, "wet"))
        .with_edge("rain", "wet")
        .bake()
        .unwrap()
}

fn row(rain: &str, wet: &str) -> Vec<Value> {
    vec![Value::from(rain), Value::from(wet)]
}

#[test]
fn network_classes() {
    let nb = NaiveBayes::new(vec![network("dry", 0.1), network("wet", 0.7)])
        .unwrap()
        .with_priors(&[3.0, 1.0])
        .unwrap();

    let rows = vec![row("yes", "yes"), row("no", "no")];
    let p = nb.predict_proba(&rows).unwrap();

    let dry = 0.75 * 0.1 * 0.9;
    let wet = 0.25 * 0.7 * 0.9;
    assert!((p[[0, 1]] - wet / (dry + wet)).abs() < 1e-9);
    assert_eq!(nb.predict(&rows).unwrap(), vec![1, 0]);

    assert!(matches!(nb.predict(&[vec![Value::from("yes")]]), Err(QuinceError::SchemaMismatch(_))));
}

#[test]
fn mismatched_columns() {
    let r = SharedDistribution::new(Categorical::new(vec![("yes", 0.5), ("no", 0.5)]).unwrap());
    let other = BayesianNetworkBuilder::new("other")
        .with_state(State::new(r, "sprinkler"))
        .bake()
        .unwrap();

    assert_eq!(other.schema(), Schema::Columns(vec![String::from("sprinkler")]));
    assert!(matches!(
        NaiveBayes::new(vec![network("a", 0.5), other]),
        Err(QuinceError::SchemaMismatch(_))
    ));
}

#[test]
fn failed_fit_changes_nothing() {
    let mut nb = NaiveBayes::new(vec![network("a", 0.5), network("b", 0.5)])
        .unwrap()
        .with_priors(&[1.0, 3.0])
        .unwrap();
    let before = nb.predict_proba(&[row("yes", "yes"), row("no", "no")]).unwrap();

    // class 0 fits, then class 1 meets a symbol outside its domain
    let rows = vec![row("yes", "yes"), row("maybe", "yes")];
    assert!(matches!(nb.fit(&rows, &[0, 1], None), Err(QuinceError::Domain { .. })));

    let priors = nb.priors();
    assert!((priors[0] - 0.25).abs() < 1e-12);
    assert!((priors[1] - 0.75).abs() < 1e-12);

    let rain = nb.models()[0].states()[0].distribution().unwrap().snapshot();
    let rain = rain.as_categorical().cloned().unwrap();
    assert_eq!(rain.probability(&"yes".into()), 0.5);

    let after = nb.predict_proba(&[row("yes", "yes"), row("no", "no")]).unwrap();
    for (a, b) in before.iter().zip(after.iter()) {
        assert!((a - b).abs() < 1e-12);
    }
}
