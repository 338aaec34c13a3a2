//! Terminal rendering of the step table.

use shared::domain::Step;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("unbalanced braces")]
    UnbalancedBraces,
    #[error("unknown control sequence \\{0}")]
    UnknownCommand(String),
}

pub trait MathRenderer: Send + Sync {
    fn render(&self, latex: &str) -> Result<String, RenderError>;
}

/// Approximates LaTeX with plain Unicode text.
pub struct PlainTextRenderer;

const SYMBOLS: &[(&str, &str)] = &[
    ("cdot", "·"),
    ("times", "×"),
    ("div", "÷"),
    ("pm", "±"),
    ("mp", "∓"),
    ("leq", "≤"),
    ("le", "≤"),
    ("geq", "≥"),
    ("ge", "≥"),
    ("neq", "≠"),
    ("ne", "≠"),
    ("approx", "≈"),
    ("infty", "∞"),
    ("pi", "π"),
    ("theta", "θ"),
    ("alpha", "α"),
    ("beta", "β"),
    ("gamma", "γ"),
    ("delta", "δ"),
    ("lambda", "λ"),
    ("mu", "μ"),
    ("sigma", "σ"),
    ("sqrt", "√"),
    ("left", ""),
    ("right", ""),
    (",", " "),
    (";", " "),
    (" ", " "),
];

impl MathRenderer for PlainTextRenderer {
    fn render(&self, latex: &str) -> Result<String, RenderError> {
        let mut out = String::with_capacity(latex.len());
        let mut depth = 0usize;
        // Brace depth at each open `\frac`, and whether its numerator closed.
        let mut fractions: Vec<(usize, bool)> = Vec::new();
        let mut chars = latex.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' => {
                    depth += 1;
                    out.push('(');
                }
                '}' => {
                    depth = depth.checked_sub(1).ok_or(RenderError::UnbalancedBraces)?;
                    match fractions.last_mut() {
                        Some((open, numerator_done)) if *open == depth => {
                            if *numerator_done {
                                fractions.pop();
                                out.push(')');
                            } else {
                                *numerator_done = true;
                                out.push_str(")/");
                            }
                        }
                        _ => out.push(')'),
                    }
                }
                '\\' => {
                    let mut name = String::new();
                    while let Some(next) = chars.peek().copied() {
                        if next.is_ascii_alphabetic() {
                            name.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        if let Some(next) = chars.next() {
                            name.push(next);
                        }
                    }
                    if name == "frac" {
                        fractions.push((depth, false));
                        continue;
                    }
                    let symbol = SYMBOLS
                        .iter()
                        .find(|(command, _)| *command == name)
                        .map(|(_, symbol)| *symbol)
                        .ok_or_else(|| RenderError::UnknownCommand(name.clone()))?;
                    out.push_str(symbol);
                }
                _ => out.push(ch),
            }
        }
        if depth != 0 {
            return Err(RenderError::UnbalancedBraces);
        }
        Ok(out)
    }
}

/// Failures are logged and shown as an empty cell.
pub fn render_equation(renderer: &dyn MathRenderer, latex: &str) -> String {
    match renderer.render(latex) {
        Ok(rendered) => rendered,
        Err(err) => {
            warn!(error = %err, equation = latex, "failed to render equation");
            String::new()
        }
    }
}

pub fn render_step_table(renderer: &dyn MathRenderer, steps: &[Step]) -> String {
    if steps.is_empty() {
        return "(no steps yet)".to_string();
    }

    let rows: Vec<(String, String, &str)> = steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            (
                (index + 1).to_string(),
                render_equation(renderer, &step.equation),
                step.command.as_str(),
            )
        })
        .collect();
    let number_width = rows.iter().map(|row| row.0.len()).max().unwrap_or(1).max(1);
    let equation_width = rows
        .iter()
        .map(|row| row.1.chars().count())
        .max()
        .unwrap_or(0)
        .max("Equation".len());

    let mut table = format!(
        "{:>number_width$}  {:<equation_width$}  Command\n",
        "#", "Equation"
    );
    for (number, equation, command) in rows {
        let padding = equation_width - equation.chars().count();
        table.push_str(&format!(
            "{number:>number_width$}  {equation}{}  {command}\n",
            " ".repeat(padding)
        ));
    }
    table.pop();
    table
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
