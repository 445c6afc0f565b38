use crate::lexer::Token;

/// Drops trailing `;` together with any whitespace or comments around it.
/// Text without a trailing terminator is returned untouched.
pub(super) fn strip(mut tokens: Vec<Token>) -> Vec<Token> {
    let mut cut = tokens.len();
    let mut saw_terminator = false;
    while cut > 0 {
        let token = &tokens[cut - 1];
        if token.is_punct(';') {
            saw_terminator = true;
        } else if !token.is_trivia() {
            break;
        }
        cut -= 1;
    }
    if saw_terminator {
        tokens.truncate(cut);
    }
    tokens
}
