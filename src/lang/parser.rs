//! Recursive-descent parser building a [`Node`] tree from KaRL tokens.
//!
//! Precedence, lowest to highest: `;` < `;>` < `,` < assignment < `=>` <
//! `||` < `&&` < equality < relational < additive < multiplicative < unary
//! < postfix (call, index, for-loop range, dynamic-name braces).
//!
//! Parsing is fail-fast and pure: it never touches a knowledge state and a
//! malformed input always yields a syntax error rather than a partial tree.

use crate::error::{KarlError, KarlResult};
use crate::lang::ast::{
    AssignOp, AssignTarget, BinaryOp, LogicalOp, NameFragment, Node, UnaryOp, VariableName,
};
use crate::lang::token::{tokenize, Token, TokenKind};

/// Parses KaRL source text into an expression tree.
///
/// Empty (or comment-only) input parses to the integer literal `0`.
pub fn parse(source: &str) -> KarlResult<Node> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Ok(Node::Integer(0));
    }
    let end = source.len();
    let mut parser = Parser { tokens, pos: 0, end };
    let node = parser.parse_expression()?;
    parser.expect_end()?;
    Ok(node)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Byte length of the source, used for end-of-input error positions.
    end: usize,
}

/// Classification of the token run between a `[` and its closing delimiter.
struct BracketScan {
    closer: usize,
    arrow: Option<usize>,
    step_minus: Option<usize>,
    greater: Option<usize>,
}

fn starts_expression(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Integer(_)
            | TokenKind::Double(_)
            | TokenKind::Text(_)
            | TokenKind::Identifier(_)
            | TokenKind::Not
            | TokenKind::Minus
            | TokenKind::Increment
            | TokenKind::Decrement
            | TokenKind::LeftParen
            | TokenKind::LeftBracket
            | TokenKind::LeftBrace
    )
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn here(&self) -> usize {
        self.peek().map_or(self.end, |t| t.span.start)
    }

    fn error(&self, message: impl Into<String>) -> KarlError {
        KarlError::syntax(message, self.here())
    }

    fn expect(&mut self, kind: &TokenKind) -> KarlResult<Token> {
        match self.peek() {
            Some(token) if token.kind == *kind => Ok(self.advance().unwrap_or_else(|| {
                unreachable!("peeked token vanished");
            })),
            Some(token) => Err(self.error(format!(
                "expected {}, found {}",
                kind.describe(),
                token.kind.describe()
            ))),
            None => Err(self.error(format!("expected {}, found end of input", kind.describe()))),
        }
    }

    fn expect_end(&self) -> KarlResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(self.error(format!("unexpected {}", token.kind.describe()))),
        }
    }

    fn parse_expression(&mut self) -> KarlResult<Node> {
        self.parse_sequence()
    }

    fn parse_sequence(&mut self) -> KarlResult<Node> {
        let mut items = vec![self.parse_return_right()?];
        while matches!(self.peek_kind(), Some(TokenKind::Semicolon)) {
            self.advance();
            // Trailing semicolons are permitted.
            match self.peek_kind() {
                Some(kind) if starts_expression(kind) => items.push(self.parse_return_right()?),
                _ => break,
            }
        }
        if items.len() == 1 {
            Ok(items.pop().unwrap_or(Node::Integer(0)))
        } else {
            Ok(Node::Sequence(items))
        }
    }

    fn parse_return_right(&mut self) -> KarlResult<Node> {
        let mut items = vec![self.parse_comma()?];
        while matches!(self.peek_kind(), Some(TokenKind::ReturnRight)) {
            self.advance();
            items.push(self.parse_comma()?);
        }
        if items.len() == 1 {
            Ok(items.pop().unwrap_or(Node::Integer(0)))
        } else {
            Ok(Node::ReturnRight(items))
        }
    }

    fn parse_comma(&mut self) -> KarlResult<Node> {
        let mut items = vec![self.parse_assignment()?];
        while matches!(self.peek_kind(), Some(TokenKind::Comma)) {
            self.advance();
            items.push(self.parse_assignment()?);
        }
        if items.len() == 1 {
            Ok(items.pop().unwrap_or(Node::Integer(0)))
        } else {
            Ok(Node::CommaJoin(items))
        }
    }

    fn parse_assignment(&mut self) -> KarlResult<Node> {
        let lhs = self.parse_implies()?;
        let op = match self.peek_kind() {
            Some(TokenKind::Assign) => AssignOp::Assign,
            Some(TokenKind::PlusAssign) => AssignOp::AddAssign,
            Some(TokenKind::MinusAssign) => AssignOp::SubAssign,
            Some(TokenKind::StarAssign) => AssignOp::MulAssign,
            Some(TokenKind::SlashAssign) => AssignOp::DivAssign,
            _ => return Ok(lhs),
        };
        let target = match lhs {
            Node::Variable(name) => AssignTarget::Variable(name),
            Node::Index { name, index } => AssignTarget::Index { name, index },
            _ => return Err(self.error("invalid assignment target")),
        };
        self.advance();
        // Right associative: a = b = c assigns c to both.
        let value = self.parse_assignment()?;
        Ok(Node::Assign {
            target,
            op,
            value: Box::new(value),
        })
    }

    fn parse_implies(&mut self) -> KarlResult<Node> {
        let mut node = self.parse_or()?;
        while matches!(self.peek_kind(), Some(TokenKind::Implies)) {
            self.advance();
            let right = self.parse_or()?;
            node = Node::Implies {
                left: Box::new(node),
                right: Box::new(right),
            };
        }
        Ok(node)
    }

    fn parse_or(&mut self) -> KarlResult<Node> {
        let mut node = self.parse_and()?;
        while matches!(self.peek_kind(), Some(TokenKind::Or)) {
            self.advance();
            let right = self.parse_and()?;
            node = Node::Logical {
                op: LogicalOp::Or,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> KarlResult<Node> {
        let mut node = self.parse_equality()?;
        while matches!(self.peek_kind(), Some(TokenKind::And)) {
            self.advance();
            let right = self.parse_equality()?;
            node = Node::Logical {
                op: LogicalOp::And,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
        Ok(node)
    }

    fn parse_equality(&mut self) -> KarlResult<Node> {
        let mut node = self.parse_relational()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Equal) => BinaryOp::Equal,
                Some(TokenKind::NotEqual) => BinaryOp::NotEqual,
                _ => return Ok(node),
            };
            self.advance();
            let right = self.parse_relational()?;
            node = Node::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
    }

    fn parse_relational(&mut self) -> KarlResult<Node> {
        let mut node = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Less) => BinaryOp::Less,
                Some(TokenKind::LessEqual) => BinaryOp::LessEqual,
                Some(TokenKind::Greater) => BinaryOp::Greater,
                Some(TokenKind::GreaterEqual) => BinaryOp::GreaterEqual,
                _ => return Ok(node),
            };
            self.advance();
            let right = self.parse_additive()?;
            node = Node::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
    }

    fn parse_additive(&mut self) -> KarlResult<Node> {
        let mut node = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Subtract,
                _ => return Ok(node),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            node = Node::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> KarlResult<Node> {
        let mut node = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinaryOp::Multiply,
                Some(TokenKind::Slash) => BinaryOp::Divide,
                Some(TokenKind::Percent) => BinaryOp::Modulo,
                _ => return Ok(node),
            };
            self.advance();
            let right = self.parse_unary()?;
            node = Node::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> KarlResult<Node> {
        let op = match self.peek_kind() {
            Some(TokenKind::Not) => Some(UnaryOp::Not),
            Some(TokenKind::Minus) => Some(UnaryOp::Negate),
            Some(TokenKind::Increment) => Some(UnaryOp::Increment),
            Some(TokenKind::Decrement) => Some(UnaryOp::Decrement),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Node::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> KarlResult<Node> {
        match self.peek_kind() {
            Some(TokenKind::Integer(_)) => {
                let Some(Token {
                    kind: TokenKind::Integer(v),
                    ..
                }) = self.advance()
                else {
                    return Err(self.error("expected integer"));
                };
                Ok(Node::Integer(v))
            }
            Some(TokenKind::Double(_)) => {
                let Some(Token {
                    kind: TokenKind::Double(v),
                    ..
                }) = self.advance()
                else {
                    return Err(self.error("expected double"));
                };
                Ok(Node::Double(v))
            }
            Some(TokenKind::Text(_)) => {
                let Some(Token {
                    kind: TokenKind::Text(s),
                    ..
                }) = self.advance()
                else {
                    return Err(self.error("expected string"));
                };
                Ok(Node::Text(s))
            }
            Some(TokenKind::LeftParen) => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::RightParen)?;
                Ok(inner)
            }
            Some(TokenKind::LeftBracket) => self.parse_list_literal(),
            Some(TokenKind::LeftBrace) => {
                let name = self.parse_variable_name(Vec::new(), None)?;
                self.parse_name_suffix(name)
            }
            Some(TokenKind::Identifier(_)) => {
                let Some(Token {
                    kind: TokenKind::Identifier(first),
                    span,
                }) = self.advance()
                else {
                    return Err(self.error("expected identifier"));
                };
                let fragments = vec![NameFragment::Literal(first)];
                let name = self.parse_variable_name(fragments, Some(span.end))?;
                self.parse_name_suffix(name)
            }
            Some(other) => Err(self.error(format!("unexpected {}", other.describe()))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    /// Extends `fragments` with adjacent identifier and `{expr}` fragments.
    /// `last_end` is the byte offset where the previous fragment ended; only
    /// touching fragments compose into one name.
    fn parse_variable_name(
        &mut self,
        mut fragments: Vec<NameFragment>,
        mut last_end: Option<usize>,
    ) -> KarlResult<VariableName> {
        loop {
            match self.peek() {
                Some(Token {
                    kind: TokenKind::LeftBrace,
                    span,
                }) if last_end.is_none() || last_end == Some(span.start) => {
                    self.advance();
                    let inner = self.parse_expression()?;
                    let close = self.expect(&TokenKind::RightBrace)?;
                    fragments.push(NameFragment::Expr(Box::new(inner)));
                    last_end = Some(close.span.end);
                }
                Some(Token {
                    kind: TokenKind::Identifier(_),
                    span,
                }) if last_end == Some(span.start) => {
                    let Some(Token {
                        kind: TokenKind::Identifier(text),
                        span,
                    }) = self.advance()
                    else {
                        return Err(self.error("expected identifier"));
                    };
                    fragments.push(NameFragment::Literal(text));
                    last_end = Some(span.end);
                }
                _ => break,
            }
        }
        if fragments.is_empty() {
            return Err(self.error("expected variable name"));
        }
        Ok(VariableName { fragments })
    }

    /// Applies a call, index, or for-loop range suffix to a parsed name.
    fn parse_name_suffix(&mut self, name: VariableName) -> KarlResult<Node> {
        match self.peek_kind() {
            Some(TokenKind::LeftParen) => {
                let Some(function) = name.as_static().map(ToString::to_string) else {
                    return Err(self.error("dynamic function names are not supported"));
                };
                self.advance();
                let mut args = Vec::new();
                if !matches!(self.peek_kind(), Some(TokenKind::RightParen)) {
                    loop {
                        args.push(self.parse_assignment()?);
                        if matches!(self.peek_kind(), Some(TokenKind::Comma)) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RightParen)?;
                Ok(Node::Call {
                    name: function,
                    args,
                })
            }
            Some(TokenKind::LeftBracket) => self.parse_bracket_suffix(name),
            _ => Ok(Node::Variable(name)),
        }
    }

    fn parse_bracket_suffix(&mut self, name: VariableName) -> KarlResult<Node> {
        let open = self.pos;
        let scan = self.scan_bracket(open)?;
        let closer_kind = self.tokens[scan.closer].kind.clone();

        if let Some(arrow) = scan.arrow {
            let start = self.parse_slice(open + 1, arrow, "loop start")?;
            let end = self.parse_slice(arrow + 1, scan.closer, "loop end")?;
            return self.finish_for_loop(name, start, None, end, scan.closer, &closer_kind);
        }

        if let (Some(minus), Some(greater)) = (scan.step_minus, scan.greater) {
            let start = self.parse_slice(open + 1, minus, "loop start")?;
            let step = if minus + 1 == greater {
                None
            } else {
                Some(self.parse_slice(minus + 1, greater, "loop step")?)
            };
            let end = self.parse_slice(greater + 1, scan.closer, "loop end")?;
            return self.finish_for_loop(name, start, step, end, scan.closer, &closer_kind);
        }

        // Plain array index.
        if closer_kind != TokenKind::RightBracket {
            return Err(KarlError::syntax(
                "array index must close with ']'",
                self.tokens[scan.closer].span.start,
            ));
        }
        let index = self.parse_slice(open + 1, scan.closer, "array index")?;
        self.pos = scan.closer + 1;
        Ok(Node::Index {
            name,
            index: Box::new(index),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_for_loop(
        &mut self,
        var: VariableName,
        start: Node,
        step: Option<Node>,
        end: Node,
        closer: usize,
        closer_kind: &TokenKind,
    ) -> KarlResult<Node> {
        let inclusive = match closer_kind {
            TokenKind::RightBracket => true,
            TokenKind::RightParen => false,
            _ => {
                return Err(KarlError::syntax(
                    "for-loop range must close with ')' or ']'",
                    self.tokens[closer].span.start,
                ))
            }
        };
        self.pos = closer + 1;
        let body = match self.peek_kind() {
            Some(kind) if starts_expression(kind) => Some(Box::new(self.parse_unary()?)),
            _ => None,
        };
        Ok(Node::ForLoop {
            var,
            start: Box::new(start),
            step: step.map(Box::new),
            end: Box::new(end),
            inclusive,
            body,
        })
    }

    /// Scans from the `[` at `open` to its closing delimiter, recording the
    /// depth-zero tokens that distinguish a for-loop range from an index.
    fn scan_bracket(&self, open: usize) -> KarlResult<BracketScan> {
        let mut depth = 0usize;
        let mut arrow = None;
        let mut greater = None;
        let mut step_minus = None;
        let mut last_minus = None;
        let mut i = open + 1;
        while i < self.tokens.len() {
            match &self.tokens[i].kind {
                TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::LeftBrace => depth += 1,
                TokenKind::RightParen | TokenKind::RightBracket | TokenKind::RightBrace => {
                    if depth == 0 {
                        return Ok(BracketScan {
                            closer: i,
                            arrow,
                            step_minus,
                            greater,
                        });
                    }
                    depth -= 1;
                }
                TokenKind::Arrow if depth == 0 && arrow.is_none() => arrow = Some(i),
                TokenKind::Minus if depth == 0 && greater.is_none() => last_minus = Some(i),
                TokenKind::Greater if depth == 0 && greater.is_none() => {
                    greater = Some(i);
                    step_minus = last_minus;
                }
                _ => {}
            }
            i += 1;
        }
        Err(KarlError::syntax(
            "missing closing bracket",
            self.tokens[open].span.start,
        ))
    }

    /// Parses `self.tokens[start..end]` as a complete sub-expression.
    fn parse_slice(&self, start: usize, end: usize, what: &str) -> KarlResult<Node> {
        if start >= end {
            let position = self
                .tokens
                .get(start)
                .map_or(self.end, |t| t.span.start);
            return Err(KarlError::syntax(format!("missing {what}"), position));
        }
        let mut sub = Parser {
            tokens: self.tokens[start..end].to_vec(),
            pos: 0,
            end: self.end,
        };
        let node = sub.parse_expression()?;
        sub.expect_end()?;
        Ok(node)
    }

    fn parse_list_literal(&mut self) -> KarlResult<Node> {
        self.advance();
        let mut items = Vec::new();
        if !matches!(self.peek_kind(), Some(TokenKind::RightBracket)) {
            loop {
                items.push(self.parse_assignment()?);
                if matches!(self.peek_kind(), Some(TokenKind::Comma)) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RightBracket)?;
        Ok(Node::List(items))
    }
}
