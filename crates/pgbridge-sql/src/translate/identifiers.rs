use crate::lexer::{Token, TokenKind};
use serde::{Deserialize, Serialize};

/// How unquoted identifiers are folded before reaching the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierCase {
    #[default]
    Upper,
    Lower,
    Preserve,
}

/// Folds unquoted words. Literals and quoted identifiers are separate token
/// kinds and are never touched; the pre-fold spelling is kept on the token.
pub(super) fn fold(mut tokens: Vec<Token>, case: IdentifierCase) -> Vec<Token> {
    if case == IdentifierCase::Preserve {
        return tokens;
    }
    for token in tokens.iter_mut().filter(|t| t.kind == TokenKind::Word) {
        let folded = match case {
            IdentifierCase::Upper => token.text.to_uppercase(),
            IdentifierCase::Lower => token.text.to_lowercase(),
            IdentifierCase::Preserve => continue,
        };
        if folded != token.text {
            token.original = Some(std::mem::replace(&mut token.text, folded));
        }
    }
    tokens
}
