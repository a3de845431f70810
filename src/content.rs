//! Plain-text rendering of the HTML snippets the AI endpoints return.

use scraper::{ElementRef, Html, Node};

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "ul", "ol", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "table", "blockquote",
    "section", "article", "header", "footer",
];

/// Strip tags and decode entities, one line per block element.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());
    walk(fragment.root_element(), &mut out);
    collapse_blank_lines(&out)
}

fn walk(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&text.replace('\u{a0}', " ")),
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = child.value().name();
                match name {
                    "script" | "style" | "head" => {}
                    "br" => out.push('\n'),
                    "li" => {
                        out.push_str("\n- ");
                        walk(child, out);
                        out.push('\n');
                    }
                    _ if BLOCK_TAGS.contains(&name) => {
                        out.push('\n');
                        walk(child, out);
                        out.push('\n');
                    }
                    _ => walk(child, out),
                }
            }
            _ => {}
        }
    }
}

fn collapse_blank_lines(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tags_and_entities() {
        let html = "<h2>Outlook</h2><p>Revenue &amp; margins grew.</p><ul><li>Strong</li><li>Cheap &lt;1x</li></ul>";
        assert_eq!(
            html_to_text(html),
            "Outlook\nRevenue & margins grew.\n- Strong\n- Cheap <1x"
        );
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(html_to_text("AT&T is up 2%"), "AT&T is up 2%");
        assert_eq!(html_to_text("a &bogus; b"), "a &bogus; b");
    }

    #[test]
    fn test_numeric_entities_and_bare_angle_brackets() {
        assert_eq!(html_to_text("P/E < 20 at &#8377;5&#x21;"), "P/E < 20 at ₹5!");
        assert_eq!(
            html_to_text("<p>Beta&nbsp;1.2<br>Yield &rsquo;24</p><script>alert(1)</script>"),
            "Beta 1.2\nYield \u{2019}24"
        );
    }

    #[test]
    fn test_attributes_with_angle_brackets_do_not_leak() {
        assert_eq!(
            html_to_text(r#"<p title="a > b">Margin <b>up</b></p>"#),
            "Margin up"
        );
    }
}
