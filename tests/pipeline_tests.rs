/// Pipeline integration tests: story request in, story out.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use storyteller_rag::core::config::PipelineConfig;
use storyteller_rag::core::generator::{CannedGenerator, GenerateError, Generator};
use storyteller_rag::core::prompt::PromptTemplate;
use storyteller_rag::{BuildError, ErrorKind, KnowledgeBase, Pipeline, Stage, EXAMPLE_REQUESTS};

const FOX_REQUEST: &str = "Tell me a story about a mythical fox from Japan.";
const HORSE_REQUEST: &str =
    "Write a short tale about a clever trick involving a wooden horse in an ancient war.";
const UNRELATED_REQUEST: &str = "Tell me about quantum computers.";

fn bestiary_pipeline() -> Pipeline {
    Pipeline::builder()
        .config_path(Path::new("tests/fixtures/small_config.ron"))
        .knowledge_base_path(Path::new("tests/fixtures/bestiary.ron"))
        .responses_path(Path::new("tests/fixtures/bestiary_responses.ron"))
        .template_path(Path::new("tests/fixtures/terse_prompt.txt"))
        .build()
        .unwrap()
}

#[test]
fn fox_request_retrieves_kitsune_and_tells_fox_story() {
    let pipeline = Pipeline::build().unwrap();
    let query = pipeline.invoke_traced(FOX_REQUEST).unwrap();

    assert_eq!(query.top_passage_id(), Some("kitsune"));
    assert!(query.prompt.contains("Kitsune"));
    assert!(query.output.contains("a young fox named Kiko"));
}

#[test]
fn wooden_horse_request_retrieves_trojan_war() {
    let pipeline = Pipeline::build().unwrap();
    let query = pipeline.invoke_traced(HORSE_REQUEST).unwrap();

    assert_eq!(query.top_passage_id(), Some("trojan_war"));
    assert!(query.retrieved.iter().all(|p| p.id != "kitsune"));
    assert!(query.output.contains("Odysseus"));
    assert!(query.output.contains("wooden horse"));
}

#[test]
fn top_ranked_passage_picks_the_story_when_both_keywords_retrieved() {
    let pipeline = Pipeline::build().unwrap();
    let query = pipeline
        .invoke_traced("Tell me a story about the wooden horse of Troy")
        .unwrap();

    let ids: Vec<&str> = query.retrieved.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["trojan_war", "kitsune"]);
    assert!(query.prompt.contains("Kitsune"));
    assert!(query.output.contains("Odysseus"));
}

#[test]
fn unrelated_request_still_retrieves_and_falls_back() {
    let pipeline = Pipeline::build().unwrap();
    let query = pipeline.invoke_traced(UNRELATED_REQUEST).unwrap();

    assert_eq!(query.retrieved.len(), 2);
    assert!(query.output.starts_with("A lone traveler"));
}

#[test]
fn invoke_matches_traced_output() {
    let pipeline = Pipeline::build().unwrap();
    let story = pipeline.invoke(FOX_REQUEST).unwrap();
    let query = pipeline.invoke_traced(FOX_REQUEST).unwrap();
    assert_eq!(story, query.output);
}

#[test]
fn repeated_invocations_are_identical() {
    let pipeline = Pipeline::build().unwrap();
    for request in [FOX_REQUEST, HORSE_REQUEST, UNRELATED_REQUEST] {
        let first = pipeline.invoke_traced(request).unwrap();
        let second = pipeline.invoke_traced(request).unwrap();
        assert_eq!(first.embedding, second.embedding);
        assert_eq!(first.retrieved, second.retrieved);
        assert_eq!(first.output, second.output);
    }
}

#[test]
fn separately_built_pipelines_agree() {
    let a = Pipeline::build().unwrap();
    let b = Pipeline::build().unwrap();
    assert_eq!(a.invoke(HORSE_REQUEST).unwrap(), b.invoke(HORSE_REQUEST).unwrap());
}

#[test]
fn example_requests_retrieve_their_passages() {
    let pipeline = Pipeline::build().unwrap();
    let expected = ["anansi", "el_dorado", "yggdrasil"];
    for (request, id) in EXAMPLE_REQUESTS.iter().zip(expected) {
        let query = pipeline.invoke_traced(request).unwrap();
        assert_eq!(query.top_passage_id(), Some(id), "request: {}", request);
    }
}

#[test]
fn empty_and_blank_requests_are_invalid_input() {
    let pipeline = Pipeline::build().unwrap();
    for request in ["", "   ", "\n\t", "?!..."] {
        let err = pipeline.invoke(request).unwrap_err();
        assert_eq!(err.stage, Stage::Embedding, "request: {:?}", request);
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.question, request);
    }
    // Still usable afterwards.
    assert!(pipeline
        .invoke(FOX_REQUEST)
        .unwrap()
        .contains("a young fox named Kiko"));
}

#[test]
fn empty_knowledge_base_degrades_to_no_context() {
    let pipeline = Pipeline::builder()
        .with_knowledge_base(KnowledgeBase::default())
        .build()
        .unwrap();
    assert_eq!(pipeline.knowledge_base_len(), 0);

    let query = pipeline.invoke_traced(HORSE_REQUEST).unwrap();
    assert!(query.retrieved.is_empty());
    assert!(query.prompt.contains(HORSE_REQUEST));
    assert!(query.output.starts_with("A lone traveler"));
}

struct Unreachable;

impl Generator for Unreachable {
    fn name(&self) -> &str {
        "hosted"
    }

    fn generate(&self, _prompt: &str) -> Result<String, GenerateError> {
        Err(GenerateError::Failed {
            backend: "hosted".to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

#[test]
fn generation_failure_preserves_question() {
    let pipeline = Pipeline::builder()
        .with_generator(Arc::new(Unreachable))
        .build()
        .unwrap();
    let err = pipeline.invoke(FOX_REQUEST).unwrap_err();

    assert_eq!(err.stage, Stage::Generating);
    assert_eq!(err.kind(), ErrorKind::GenerationFailed);
    assert_eq!(err.question, FOX_REQUEST);
    assert!(err.to_string().contains("connection refused"));
}

#[test]
fn shared_pipeline_serves_concurrent_requests() {
    let pipeline = Arc::new(Pipeline::build().unwrap());
    let expected = pipeline.invoke(FOX_REQUEST).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                let request = if i % 2 == 0 { FOX_REQUEST } else { HORSE_REQUEST };
                (i, pipeline.invoke(request).unwrap())
            })
        })
        .collect();

    for handle in handles {
        let (i, story) = handle.join().unwrap();
        if i % 2 == 0 {
            assert_eq!(story, expected);
        } else {
            assert!(story.contains("Odysseus"));
        }
    }
}

#[test]
fn pipeline_builds_from_fixture_files() {
    let pipeline = bestiary_pipeline();
    assert_eq!(pipeline.knowledge_base_len(), 3);
    assert_eq!(pipeline.top_k(), 1);
    assert_eq!(pipeline.dimensions(), 256);
    assert_eq!(pipeline.max_prompt_chars(), Some(2000));

    let query = pipeline
        .invoke_traced("A tale about a river creature that bows")
        .unwrap();
    assert_eq!(query.top_passage_id(), Some("kappa"));
    assert!(query.prompt.starts_with("Notes:\nThe kappa"));
    assert!(query.prompt.contains("Request: A tale about a river creature that bows"));
    assert_eq!(query.output, "A polite girl bowed to the kappa, and the river went quiet.");
}

#[test]
fn weighted_alternatives_are_stable_per_request() {
    let pipeline = bestiary_pipeline();
    let first = pipeline.invoke("The seal who lost her skin").unwrap();
    let second = pipeline.invoke("The seal who lost her skin").unwrap();
    assert_eq!(first, second);
    assert!(
        first == "The fisherman found the sealskin behind the peat stack."
            || first == "On the longest night the selkie walked back into the waves."
    );
}

#[test]
fn fixture_fallback_when_no_keyword_matches() {
    let pipeline = bestiary_pipeline();
    let query = pipeline
        .invoke_traced("Something booming in the swamp at night")
        .unwrap();
    assert_eq!(query.top_passage_id(), Some("bunyip"));
    assert_eq!(query.output, "Nobody in the village had heard of such a thing.");
}

#[test]
fn components_can_be_supplied_directly() {
    let config = PipelineConfig::load_from_ron(Path::new("tests/fixtures/small_config.ron")).unwrap();
    let kb = KnowledgeBase::load_from_ron(Path::new("tests/fixtures/bestiary.ron")).unwrap();
    let generator =
        CannedGenerator::load_from_ron(Path::new("tests/fixtures/bestiary_responses.ron"), config.seed)
            .unwrap();
    let template = PromptTemplate::load(Path::new("tests/fixtures/terse_prompt.txt")).unwrap();

    let pipeline = Pipeline::builder()
        .with_config(config)
        .with_knowledge_base(kb)
        .with_generator(Arc::new(generator))
        .with_template(template)
        .build()
        .unwrap();
    assert_eq!(
        pipeline.invoke("kappa").unwrap(),
        "A polite girl bowed to the kappa, and the river went quiet."
    );
}

#[test]
fn invalid_knowledge_base_file_fails_build() {
    let err = Pipeline::builder()
        .knowledge_base_path(Path::new("tests/fixtures/bad_duplicate.ron"))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, BuildError::KnowledgeBase(_)));
    assert!(err.to_string().contains("twin"));
}
