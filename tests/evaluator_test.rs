//! End-to-end conversation flows through the routing evaluator.

use std::collections::HashMap;
use std::sync::Arc;

use consult_core::eval::{EvalState, ResolutionMode, RoutingEvaluator};
use consult_core::expression::TraitValue;
use consult_core::model::RoutingSpec;
use consult_core::parser::TraitParser;
use consult_core::provider::simple_expert::SimpleExpertModel;
use consult_core::session::{is_clarifier_key, Session};
use consult_core::EvaluatorConfig;
use pretty_assertions::assert_eq;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn travel_spec() -> RoutingSpec {
    let (spec, _warnings) = RoutingSpec::from_json(
        r#"{
        "id": "travel",
        "traits": [
            {"key": "ages", "question": "What are the travellers' ages?",
             "answer_type": "integer_list", "required": true},
            {"key": "budget", "question": "What is your total budget?",
             "answer_type": "integer", "required": true},
            {"key": "destination", "question": "Anywhere in mind?",
             "answer_type": "text", "required": false}
        ],
        "derived_traits": [
            {"key": "youngest", "expression": "min(ages)"},
            {"key": "adults", "expression": "count(ages >= 18)"}
        ],
        "immediate_select": [
            {"outcome_id": "group_desk", "rule": "adults >= 6"}
        ],
        "outcomes": [
            {"id": "family", "rules": ["youngest < 12"], "content": "Family resort week"},
            {"id": "city_break", "rules": ["budget >= 2000"], "content": "City break"},
            {"id": "group_desk", "rules": ["adults >= 6"], "content": "Group travel desk"}
        ],
        "tie_strategy": {
            "mode": "LLM_CLARIFIER",
            "max_clarifier_attempts": 2,
            "pseudo_traits": [
                {"key": "vibe", "question": "More about relaxing or exploring?",
                 "answer_type": "enum", "pseudo": true,
                 "options": ["RELAX", "EXPLORE"],
                 "option_outcomes": {"RELAX": "family", "EXPLORE": "city_break"}}
            ]
        },
        "disambiguation": {"fallback_trait_order": ["destination"]}
    }"#,
    )
    .unwrap();
    spec
}

#[tokio::test]
async fn test_full_conversation_to_single_match() {
    init_tracing();
    let spec = travel_spec();
    let config = EvaluatorConfig::default();
    let evaluator = RoutingEvaluator::without_llm(config.clone());
    let parser = TraitParser::new(
        Arc::new(consult_core::provider::llm::DisabledModel),
        config,
    );
    let mut session = Session::new();

    // Turn 1: nothing known, the first required trait is asked.
    let result = evaluator.evaluate(&spec, &session.known_traits).await;
    assert_eq!(result.state, EvalState::Collecting);
    let asked = result.next_trait.unwrap();
    assert_eq!(asked.key, "ages");
    session.await_trait(&asked);

    let parsed = parser
        .parse("we are 5, 8 and 41", &asked, &session)
        .await;
    session.accept_answer("ages", parsed.value.unwrap());

    // Turn 2: youngest is 5, family matches alone (budget still unknown, so
    // city_break's rule is false, not an error).
    let result = evaluator.evaluate(&spec, &session.known_traits).await;
    assert_eq!(result.state, EvalState::Complete);
    assert_eq!(result.resolution_mode, Some(ResolutionMode::SingleMatch));
    assert_eq!(result.outcome.unwrap().id, "family");
    assert_eq!(result.summary, None);
}

#[tokio::test]
async fn test_immediate_select_overrides_outcome_matching() {
    let spec = travel_spec();
    let evaluator = RoutingEvaluator::without_llm(EvaluatorConfig::default());

    let mut known = HashMap::new();
    known.insert(
        "ages".to_string(),
        TraitValue::IntList(vec![30, 31, 32, 33, 34, 35]),
    );
    known.insert("budget".to_string(), TraitValue::Int(9000));

    let result = evaluator.evaluate(&spec, &known).await;
    assert_eq!(result.resolution_mode, Some(ResolutionMode::Immediate));
    assert_eq!(result.outcome.unwrap().id, "group_desk");
}

#[tokio::test]
async fn test_tie_resolved_by_author_defined_pseudo_trait() {
    let spec = travel_spec();
    let config = EvaluatorConfig::default();
    let evaluator = RoutingEvaluator::without_llm(config.clone());
    let parser = TraitParser::new(
        Arc::new(consult_core::provider::llm::DisabledModel),
        config,
    );
    let mut session = Session::new();
    session
        .known_traits
        .insert("ages".to_string(), TraitValue::IntList(vec![8, 40]));
    session
        .known_traits
        .insert("budget".to_string(), TraitValue::Int(3000));

    // family and city_break both match: the authored pseudo-trait is asked.
    let result = evaluator.evaluate(&spec, &session.known_traits).await;
    assert_eq!(result.state, EvalState::TiePending);
    assert_eq!(
        result.resolution_mode,
        Some(ResolutionMode::PseudoTraitClarifier)
    );
    assert_eq!(result.tied_outcomes, vec!["family", "city_break"]);
    let clarifier = result.next_trait.unwrap();
    assert_eq!(clarifier.key, "vibe");
    session.await_trait(&clarifier);

    let parsed = parser
        .parse("definitely explore new places", &clarifier, &session)
        .await;
    assert!(parsed.is_valid);
    session.accept_answer("vibe", parsed.value.unwrap());

    let result = evaluator.evaluate(&spec, &session.known_traits).await;
    assert_eq!(result.state, EvalState::Complete);
    assert_eq!(
        result.resolution_mode,
        Some(ResolutionMode::PseudoTraitClarifier)
    );
    assert_eq!(result.outcome.unwrap().id, "city_break");
}

#[tokio::test]
async fn test_tie_without_llm_and_without_pseudo_traits_falls_back() {
    let mut spec = travel_spec();
    spec.tie_strategy.pseudo_traits.clear();
    let evaluator = RoutingEvaluator::without_llm(EvaluatorConfig::default());

    let mut known = HashMap::new();
    known.insert("ages".to_string(), TraitValue::IntList(vec![8, 40]));
    known.insert("budget".to_string(), TraitValue::Int(3000));

    let result = evaluator.evaluate(&spec, &known).await;
    assert_eq!(result.state, EvalState::Complete);
    assert_eq!(result.resolution_mode, Some(ResolutionMode::TieFallback));
    // First tied outcome in declaration order.
    assert_eq!(result.outcome.unwrap().id, "family");
    assert_eq!(result.tied_outcomes, vec!["family", "city_break"]);
}

#[tokio::test]
async fn test_llm_generated_clarifier_round_trip() {
    init_tracing();
    let mut spec = travel_spec();
    spec.tie_strategy.pseudo_traits.clear();

    // Scripted model: one reply generates the clarifying question, the other
    // picks the winner once the user has answered it.
    let model = SimpleExpertModel::new()
        .with_reply(
            "tell them apart",
            "QUESTION: Do you want culture or beach time?\nTYPE: enum\nOPTIONS: culture, beach",
        )
        .with_reply(
            "USER CLARIFICATION",
            "WINNER: city_break\nSUMMARY: Culture points to a city break.",
        );
    let config = EvaluatorConfig::default();
    let evaluator = RoutingEvaluator::new(Arc::new(model.clone()), config.clone());
    let parser = TraitParser::new(Arc::new(model), config);

    let mut session = Session::new();
    session
        .known_traits
        .insert("ages".to_string(), TraitValue::IntList(vec![8, 40]));
    session
        .known_traits
        .insert("budget".to_string(), TraitValue::Int(3000));

    let result = evaluator.evaluate(&spec, &session.known_traits).await;
    assert_eq!(result.state, EvalState::TiePending);
    assert_eq!(result.resolution_mode, Some(ResolutionMode::LlmClarifier));
    let generated = result.next_trait.unwrap();
    assert!(is_clarifier_key(&generated.key));
    assert_eq!(generated.options, vec!["culture", "beach"]);
    session.await_trait(&generated);

    let parsed = parser.parse("culture for sure", &generated, &session).await;
    assert!(parsed.is_valid);
    session.accept_answer(generated.key.clone(), parsed.value.unwrap());

    let result = evaluator.evaluate(&spec, &session.known_traits).await;
    assert_eq!(result.state, EvalState::Complete);
    assert_eq!(result.resolution_mode, Some(ResolutionMode::LlmResolved));
    assert_eq!(result.outcome.unwrap().id, "city_break");
    assert_eq!(
        result.summary,
        Some("Culture points to a city break.".to_string())
    );
}

#[tokio::test]
async fn test_evaluation_is_deterministic_with_llm_disabled() {
    let spec = travel_spec();
    let evaluator = RoutingEvaluator::without_llm(EvaluatorConfig::default());

    let mut known = HashMap::new();
    known.insert("ages".to_string(), TraitValue::IntList(vec![8, 40]));
    known.insert("budget".to_string(), TraitValue::Int(3000));

    let first = evaluator.evaluate(&spec, &known).await;
    let second = evaluator.evaluate(&spec, &known).await;
    assert_eq!(first.state, second.state);
    assert_eq!(first.resolution_mode, second.resolution_mode);
    assert_eq!(first.tied_outcomes, second.tied_outcomes);
    assert_eq!(
        first.next_trait.map(|t| t.key),
        second.next_trait.map(|t| t.key)
    );
}
