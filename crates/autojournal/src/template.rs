//! `{placeholder}` substitution for rule line descriptions.

pub const PLACEHOLDERS: [&str; 5] = [
    "source_id",
    "reference",
    "description",
    "transaction_type",
    "source_module",
];

#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub source_module: &'a str,
    pub transaction_type: &'a str,
    pub source_id: &'a str,
    pub reference: &'a str,
    pub description: &'a str,
}

impl TemplateContext<'_> {
    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "source_id" => Some(self.source_id),
            "reference" => Some(self.reference),
            "description" => Some(self.description),
            "transaction_type" => Some(self.transaction_type),
            "source_module" => Some(self.source_module),
            _ => None,
        }
    }
}

/// Names between `{` and `}` that are not known placeholders.
pub fn unknown_placeholders(template: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else { break };
        let name = &after[..close];
        if !PLACEHOLDERS.contains(&name) {
            out.push(name);
        }
        rest = &after[close + 1..];
    }
    out
}

/// Substitute known placeholders; anything else is copied verbatim.
pub fn render(template: &str, ctx: &TemplateContext<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match ctx.lookup(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
