use async_trait::async_trait;

use crate::{config_u64, require_str, Operator, OperatorError, OperatorInput, OperatorOutput, OperatorServices};

/// Config: `strategy` in {fixed, sliding, semantic}, `chunk_size` > 0,
/// `overlap` >= 0 (overlap < chunk_size). Output is the JSON-serialized
/// chunk list; `reducer` recognizes this shape.
pub struct SplitterOperator;

#[async_trait]
impl Operator for SplitterOperator {
    async fn execute(
        &self,
        input: OperatorInput,
        services: &OperatorServices,
    ) -> Result<OperatorOutput, OperatorError> {
        services.publisher.node_start();

        let result = (|| -> Result<Vec<String>, OperatorError> {
            let strategy = require_str(&input.vertex.config, "strategy")?;
            let chunk_size = config_u64(&input.vertex.config, "chunk_size", 0) as usize;
            if chunk_size == 0 {
                return Err(OperatorError::InvalidConfig("chunk_size must be > 0".into()));
            }
            let overlap = config_u64(&input.vertex.config, "overlap", 0) as usize;
            if overlap >= chunk_size {
                return Err(OperatorError::InvalidConfig("overlap must be < chunk_size".into()));
            }

            let chunks = match strategy.as_str() {
                "fixed" => split_fixed(&input.payload, chunk_size),
                "sliding" => split_sliding(&input.payload, chunk_size, overlap),
                "semantic" => split_semantic(&input.payload, chunk_size),
                other => {
                    return Err(OperatorError::InvalidConfig(format!("unknown splitter strategy '{other}'")))
                }
            };
            Ok(chunks)
        })();

        match result {
            Ok(chunks) => {
                let text = serde_json::to_string(&chunks).expect("chunk list serializes");
                services.publisher.node_finish(text.clone());
                Ok(OperatorOutput {
                    text,
                    enabled_ports: Vec::new(),
                })
            }
            Err(e) => {
                services.publisher.node_failed(e.kind(), e.to_string());
                Err(e)
            }
        }
    }
}

fn split_fixed(payload: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = payload.chars().collect();
    chars.chunks(chunk_size).map(|c| c.iter().collect()).collect()
}

fn split_sliding(payload: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = payload.chars().collect();
    let stride = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    chunks
}

fn split_semantic(payload: &str, chunk_size: usize) -> Vec<String> {
    let paragraphs: Vec<&str> = payload.split("\n\n").filter(|p| !p.is_empty()).collect();
    let mut chunks = Vec::new();
    let mut current = String::new();
    for paragraph in paragraphs {
        if !current.is_empty() && current.chars().count() + 2 + paragraph.chars().count() > chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bare_vertex, test_services};
    use graph_model::VertexKind;

    #[tokio::test]
    async fn fixed_splits_by_char_count() {
        let (services, _rx) = test_services("s");
        let mut vertex = bare_vertex("s", VertexKind::Splitter);
        vertex.config = serde_json::json!({"strategy": "fixed", "chunk_size": 4, "overlap": 0});
        let input = OperatorInput {
            vertex,
            payload: "abcdefgh".to_string(),
            iteration: None,
        };
        let output = SplitterOperator.execute(input, &services).await.unwrap();
        let chunks: Vec<String> = serde_json::from_str(&output.text).unwrap();
        assert_eq!(chunks, vec!["abcd", "efgh"]);
    }

    #[tokio::test]
    async fn sliding_uses_stride_of_size_minus_overlap() {
        let (services, _rx) = test_services("s");
        let mut vertex = bare_vertex("s", VertexKind::Splitter);
        vertex.config = serde_json::json!({"strategy": "sliding", "chunk_size": 4, "overlap": 2});
        let input = OperatorInput {
            vertex,
            payload: "abcdefgh".to_string(),
            iteration: None,
        };
        let output = SplitterOperator.execute(input, &services).await.unwrap();
        let chunks: Vec<String> = serde_json::from_str(&output.text).unwrap();
        assert_eq!(chunks, vec!["abcd", "cdef", "efgh", "gh"]);
    }

    #[tokio::test]
    async fn semantic_never_splits_a_paragraph() {
        let (services, _rx) = test_services("s");
        let mut vertex = bare_vertex("s", VertexKind::Splitter);
        vertex.config = serde_json::json!({"strategy": "semantic", "chunk_size": 10, "overlap": 0});
        let input = OperatorInput {
            vertex,
            payload: "short one\n\nshort two\n\na much longer paragraph than ten chars".to_string(),
            iteration: None,
        };
        let output = SplitterOperator.execute(input, &services).await.unwrap();
        let chunks: Vec<String> = serde_json::from_str(&output.text).unwrap();
        assert!(chunks.iter().any(|c| c.contains("a much longer paragraph")));
    }

    #[tokio::test]
    async fn zero_chunk_size_is_invalid_config() {
        let (services, _rx) = test_services("s");
        let mut vertex = bare_vertex("s", VertexKind::Splitter);
        vertex.config = serde_json::json!({"strategy": "fixed", "chunk_size": 0});
        let input = OperatorInput {
            vertex,
            payload: "abc".to_string(),
            iteration: None,
        };
        let err = SplitterOperator.execute(input, &services).await.unwrap_err();
        assert_eq!(err.kind(), "operator-invalid-config");
    }
}
