//! Semantic-token decoding
//!
//! Builds a decoder from the legend the server advertises during
//! initialization and turns the packed `[deltaLine, deltaStart, length,
//! tokenType, modifiers]` arrays into positioned tokens with their source
//! text.

use lsp_types::{
    Position, Range, SemanticTokensLegend, SemanticTokensServerCapabilities, ServerCapabilities,
};
use serde::{Deserialize, Serialize};

/// One decoded semantic token. Ranges are zero-based LSP units with
/// UTF-16 code-unit columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPosition {
    pub token_type: String,
    pub text: String,
    pub range: Range,
}

/// Decoder bound to one server's semantic-token legend.
#[derive(Debug, Clone, Default)]
pub struct SemanticTokenDecoder {
    token_types: Vec<String>,
    token_modifiers: Vec<String>,
}

impl SemanticTokenDecoder {
    /// Build a decoder from the server's advertised capabilities. Returns
    /// `None` when the server does not provide semantic tokens. Both the
    /// plain and the registration-options capability shapes carry a
    /// legend; accept either.
    pub fn from_capabilities(capabilities: &ServerCapabilities) -> Option<Self> {
        let legend = match capabilities.semantic_tokens_provider.as_ref()? {
            SemanticTokensServerCapabilities::SemanticTokensOptions(options) => &options.legend,
            SemanticTokensServerCapabilities::SemanticTokensRegistrationOptions(registration) => {
                &registration.semantic_tokens_options.legend
            }
        };
        Some(Self::from_legend(legend))
    }

    pub fn from_legend(legend: &SemanticTokensLegend) -> Self {
        Self {
            token_types: legend
                .token_types
                .iter()
                .map(|t| t.as_str().to_string())
                .collect(),
            token_modifiers: legend
                .token_modifiers
                .iter()
                .map(|m| m.as_str().to_string())
                .collect(),
        }
    }

    /// Number of token types in the legend.
    pub fn token_type_count(&self) -> usize {
        self.token_types.len()
    }

    /// Modifier names for a modifier bitset.
    pub fn modifiers_for(&self, bitset: u32) -> Vec<&str> {
        self.token_modifiers
            .iter()
            .enumerate()
            .filter(|(i, _)| bitset & (1 << i) != 0)
            .map(|(_, name)| name.as_str())
            .collect()
    }

    /// Decode a packed token array against the document content the tokens
    /// were computed for. Malformed trailing groups are ignored; token
    /// types outside the legend decode as their numeric index.
    pub fn decode(&self, data: &[u32], content: &str) -> Vec<TokenPosition> {
        let lines: Vec<&str> = content.split('\n').collect();
        let mut tokens = Vec::with_capacity(data.len() / 5);
        let mut line = 0u32;
        let mut start = 0u32;

        for group in data.chunks_exact(5) {
            let [delta_line, delta_start, length, token_type, _modifiers] =
                [group[0], group[1], group[2], group[3], group[4]];

            if delta_line > 0 {
                line += delta_line;
                start = delta_start;
            } else {
                start += delta_start;
            }

            let token_name = self
                .token_types
                .get(token_type as usize)
                .cloned()
                .unwrap_or_else(|| token_type.to_string());

            let text = lines
                .get(line as usize)
                .map(|l| slice_utf16(l, start, start + length))
                .unwrap_or_default();

            tokens.push(TokenPosition {
                token_type: token_name,
                text,
                range: Range {
                    start: Position { line, character: start },
                    end: Position {
                        line,
                        character: start + length,
                    },
                },
            });
        }

        tokens
    }
}

/// Slice a line by UTF-16 code-unit columns, clamping to the line end.
fn slice_utf16(line: &str, start: u32, end: u32) -> String {
    let mut out = String::new();
    let mut col = 0u32;
    for c in line.chars() {
        let width = c.len_utf16() as u32;
        if col >= end {
            break;
        }
        if col >= start {
            out.push(c);
        }
        col += width;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{SemanticTokenModifier, SemanticTokenType};

    fn decoder() -> SemanticTokenDecoder {
        SemanticTokenDecoder::from_legend(&SemanticTokensLegend {
            token_types: vec![
                SemanticTokenType::FUNCTION,
                SemanticTokenType::VARIABLE,
                SemanticTokenType::KEYWORD,
            ],
            token_modifiers: vec![
                SemanticTokenModifier::DECLARATION,
                SemanticTokenModifier::READONLY,
            ],
        })
    }

    #[test]
    fn test_decode_relative_positions() {
        let content = "func main() {\n\tcall()\n}";
        // "func" keyword at 0:0, "main" function at 0:5, "call" at 1:1.
        let data = [0, 0, 4, 2, 0, 0, 5, 4, 0, 0, 1, 1, 4, 0, 0];
        let tokens = decoder().decode(&data, content);

        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].token_type, "keyword");
        assert_eq!(tokens[0].text, "func");
        assert_eq!(tokens[1].token_type, "function");
        assert_eq!(tokens[1].text, "main");
        assert_eq!(tokens[1].range.start, Position { line: 0, character: 5 });
        assert_eq!(tokens[2].text, "call");
        assert_eq!(tokens[2].range.start, Position { line: 1, character: 1 });
    }

    #[test]
    fn test_unknown_token_type_keeps_index() {
        let tokens = decoder().decode(&[0, 0, 1, 42, 0], "x");
        assert_eq!(tokens[0].token_type, "42");
    }

    #[test]
    fn test_truncated_group_ignored() {
        let tokens = decoder().decode(&[0, 0, 1, 0, 0, 0, 2], "ab");
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_modifier_bitset() {
        let decoder = decoder();
        assert_eq!(decoder.modifiers_for(0b01), vec!["declaration"]);
        assert_eq!(decoder.modifiers_for(0b11), vec!["declaration", "readonly"]);
        assert!(decoder.modifiers_for(0).is_empty());
    }

    #[test]
    fn test_utf16_slicing_of_wide_characters() {
        // '𝕏' is two UTF-16 code units; the identifier after it starts at
        // column 3 in LSP units.
        let line = "𝕏 abc";
        assert_eq!(slice_utf16(line, 3, 6), "abc");
        assert_eq!(slice_utf16(line, 0, 2), "𝕏");
    }

    #[test]
    fn test_length_clamped_to_line_end() {
        let tokens = decoder().decode(&[0, 0, 99, 0, 0], "short");
        assert_eq!(tokens[0].text, "short");
    }
}
