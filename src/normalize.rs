use scraper::{ElementRef, Html, Node};

/// Inline marker used for line breaks inside a table cell.
pub const CELL_BREAK: &str = "<br>";

const GRID_SEPARATOR: &str = "| --- |";
const GRID_ROW_START: &str = "\n| ";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Highlight {
    Red,
    Green,
}

impl Highlight {
    fn label(self) -> &'static str {
        match self {
            Highlight::Red => "red",
            Highlight::Green => "green",
        }
    }
}

/// Converts an element into the card text representation.
///
/// Text nodes are copied verbatim, `<br>` becomes a newline, tables become a
/// blank-line delimited markdown grid and red/green elements are wrapped in
/// `:red[...]` / `:green[...]`. The element's own colour is not inspected, only
/// its descendants', so passing a container yields its content.
pub fn normalize(element: ElementRef<'_>) -> String {
    if element.value().name() == "table" {
        return render_table(element);
    }
    normalize_children(element)
}

/// Parses `html` as a fragment and normalizes the whole of it.
pub fn normalize_fragment(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    normalize(fragment.root_element())
}

fn normalize_children(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.children() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let Some(child) = ElementRef::wrap(node) else {
                    continue;
                };
                match el.name() {
                    "br" => out.push('\n'),
                    "table" => out.push_str(&render_table(child)),
                    _ => {
                        let inner = normalize_children(child);
                        match highlight_of(child) {
                            Some(color) if !contains_grid(&inner) => {
                                out.push_str(&format!(":{}[{}]", color.label(), inner));
                            }
                            _ => out.push_str(&inner),
                        }
                    }
                }
            }
            _ => {}
        }
    }
    out
}

// A colour wrapper around a grid breaks the markdown table.
fn contains_grid(text: &str) -> bool {
    text.contains(GRID_SEPARATOR) || text.contains(GRID_ROW_START)
}

fn highlight_of(element: ElementRef<'_>) -> Option<Highlight> {
    let value = element.value();
    let classes: Vec<String> = value.classes().map(str::to_lowercase).collect();
    let style = value.attr("style").unwrap_or_default().to_lowercase();

    let red = classes.iter().any(|c| c == "clr2" || c.contains("red"))
        || style.contains("color:red")
        || style.contains("color: red")
        || style.contains("#ff0000");
    if red {
        return Some(Highlight::Red);
    }

    let green = classes.iter().any(|c| c.contains("green"))
        || style.contains("color:green")
        || style.contains("color: green");
    green.then_some(Highlight::Green)
}

fn render_table(table: ElementRef<'_>) -> String {
    let mut rows = Vec::new();
    let mut loose = String::new();
    collect_rows(table, &mut rows, &mut loose);

    // Captions and stray text go above the grid so nothing is dropped.
    let loose = loose.trim();
    let caption = if loose.is_empty() {
        String::new()
    } else {
        format!("{loose}\n")
    };

    let mut rows = rows.into_iter();
    let Some(header) = rows.next() else {
        return if loose.is_empty() {
            String::new()
        } else {
            format!("\n\n{loose}\n\n")
        };
    };
    let width = header.len();

    let mut lines = Vec::new();
    lines.push(grid_line(&header));
    lines.push(grid_line(&vec!["---".to_string(); width]));

    for mut cells in rows {
        cells.resize(width, String::new());
        lines.push(grid_line(&cells));
    }

    format!("\n\n{caption}{}\n\n", lines.join("\n"))
}

// Only this table's rows: direct `tr` children and those of its row groups.
// Rows of a nested table stay inside the cell that holds it.
fn collect_rows(parent: ElementRef<'_>, rows: &mut Vec<Vec<String>>, loose: &mut String) {
    for node in parent.children() {
        match node.value() {
            Node::Text(text) => loose.push_str(text),
            Node::Element(el) => {
                let Some(child) = ElementRef::wrap(node) else {
                    continue;
                };
                match el.name() {
                    "tr" => rows.push(row_cells(child, loose)),
                    "thead" | "tbody" | "tfoot" => collect_rows(child, rows, loose),
                    _ => loose.push_str(&normalize(child)),
                }
            }
            _ => {}
        }
    }
}

fn row_cells(row: ElementRef<'_>, loose: &mut String) -> Vec<String> {
    let mut cells = Vec::new();
    for node in row.children() {
        match node.value() {
            Node::Text(text) => loose.push_str(text),
            Node::Element(el) => {
                let Some(child) = ElementRef::wrap(node) else {
                    continue;
                };
                match el.name() {
                    "th" | "td" => cells.push(normalize(child).trim().replace('\n', CELL_BREAK)),
                    _ => loose.push_str(&normalize(child)),
                }
            }
            _ => {}
        }
    }
    cells
}

fn grid_line(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WRAPPERS: [(&str, &str); 5] = [
        ("span", ""),
        ("b", ""),
        ("div", ""),
        ("span", r#" class="clr2""#),
        ("div", r#" style="color: green""#),
    ];

    #[derive(Clone, Debug)]
    enum Tree {
        Leaf,
        Wrap(usize, Vec<Tree>),
        Table(Vec<Vec<Tree>>),
    }

    fn tree() -> impl Strategy<Value = Tree> {
        Just(Tree::Leaf).prop_recursive(4, 32, 4, |inner| {
            let cell = inner.clone();
            prop_oneof![
                (0..WRAPPERS.len(), prop::collection::vec(inner, 1..4))
                    .prop_map(|(wrapper, kids)| Tree::Wrap(wrapper, kids)),
                (1..4usize, 1..4usize)
                    .prop_flat_map(move |(rows, width)| {
                        prop::collection::vec(prop::collection::vec(cell.clone(), width), rows)
                    })
                    .prop_map(Tree::Table),
            ]
        })
    }

    // Leaves are `x{n}y`, so no leaf is a substring of another or of two joined.
    fn render(tree: &Tree, html: &mut String, leaves: &mut Vec<String>) {
        match tree {
            Tree::Leaf => {
                let leaf = format!("x{}y", leaves.len());
                html.push_str(&leaf);
                leaves.push(leaf);
            }
            Tree::Wrap(wrapper, kids) => {
                let (tag, attrs) = WRAPPERS[*wrapper];
                html.push_str(&format!("<{tag}{attrs}>"));
                for kid in kids {
                    render(kid, html, leaves);
                }
                html.push_str(&format!("</{tag}>"));
            }
            Tree::Table(rows) => {
                html.push_str("<table>");
                for row in rows {
                    html.push_str("<tr>");
                    for cell in row {
                        html.push_str("<td>");
                        render(cell, html, leaves);
                        html.push_str("</td>");
                    }
                    html.push_str("</tr>");
                }
                html.push_str("</table>");
            }
        }
    }

    proptest! {
        #[test]
        fn every_generated_leaf_appears_once_in_order(root in tree()) {
            let mut html = String::new();
            let mut leaves = Vec::new();
            render(&root, &mut html, &mut leaves);
            let out = normalize_fragment(&html);

            let mut cursor = 0;
            for leaf in &leaves {
                prop_assert_eq!(out.matches(leaf.as_str()).count(), 1, "{} in {:?}", leaf, out);
                let found = out[cursor..].find(leaf.as_str());
                prop_assert!(found.is_some(), "{} out of order in {:?}", leaf, out);
                cursor += found.unwrap_or_default() + leaf.len();
            }
        }

        #[test]
        fn plain_text_is_left_untouched(text in "[a-zA-Z0-9.,:()][a-zA-Z0-9 .,:()\\[\\]]{0,40}") {
            let once = normalize_fragment(&text);
            prop_assert_eq!(&once, &text);
            prop_assert_eq!(normalize_fragment(&once), text);
        }
    }

    #[test]
    fn br_becomes_newline() {
        assert_eq!(normalize_fragment("first<br>second<br/>third"), "first\nsecond\nthird");
    }

    #[test]
    fn colour_classes_and_styles_are_marked() {
        assert_eq!(
            normalize_fragment(r#"a <span class="clr2">b</span> c"#),
            "a :red[b] c"
        );
        assert_eq!(
            normalize_fragment(r#"<span style="COLOR: Red">x</span>"#),
            ":red[x]"
        );
        assert_eq!(
            normalize_fragment(r##"<font style="color:#FF0000">x</font>"##),
            ":red[x]"
        );
        assert_eq!(
            normalize_fragment(r#"<span class="text-green">ok</span>"#),
            ":green[ok]"
        );
        assert_eq!(normalize_fragment(r#"<b class="bold">plain</b>"#), "plain");
    }

    #[test]
    fn nested_colours_wrap_each_level() {
        assert_eq!(
            normalize_fragment(r#"<span class="green">a<span class="clr2">b</span></span>"#),
            ":green[a:red[b]]"
        );
    }

    #[test]
    fn table_becomes_grid() {
        let html = "<table><tr><th>H1</th><th>H2</th></tr>\
                    <tr><td>a</td><td>b</td></tr>\
                    <tr><td>c</td><td>d</td></tr></table>";
        let out = normalize_fragment(html);
        let lines: Vec<&str> = out.lines().filter(|l| l.starts_with('|')).collect();
        assert_eq!(
            lines,
            vec!["| H1 | H2 |", "| --- | --- |", "| a | b |", "| c | d |"]
        );
        assert!(out.starts_with("\n\n"));
        assert!(out.ends_with("\n\n"));
    }

    #[test]
    fn ragged_rows_are_padded_and_truncated() {
        let html = "<table><tr><td>A</td><td>B</td></tr>\
                    <tr><td>only</td></tr>\
                    <tr><td>1</td><td>2</td><td>3</td></tr></table>";
        let out = normalize_fragment(html);
        assert!(out.contains("| only |  |"));
        assert!(out.contains("| 1 | 2 |"));
        assert!(!out.contains('3'));
    }

    #[test]
    fn cell_line_breaks_use_inline_marker() {
        let html = "<table><tr><th>k</th></tr><tr><td> one<br>two </td></tr></table>";
        assert!(normalize_fragment(html).contains("| one<br>two |"));
    }

    #[test]
    fn coloured_cell_keeps_marker_inside_grid() {
        let html = r#"<table><tr><th>k</th></tr><tr><td><span class="clr2">hot</span></td></tr></table>"#;
        assert!(normalize_fragment(html).contains("| :red[hot] |"));
    }

    #[test]
    fn colour_around_table_is_suppressed() {
        let html = r#"<div class="clr2">intro<table><tr><th>x</th></tr><tr><td>y</td></tr></table></div>"#;
        let out = normalize_fragment(html);
        assert!(!out.contains(":red["));
        assert!(out.contains("| --- |"));
        assert!(out.starts_with("intro"));
    }

    #[test]
    fn nested_table_stays_in_its_cell() {
        let html = "<table><tr><th>outer</th></tr>\
                    <tr><td><table><tr><td>inner</td></tr></table></td></tr></table>";
        let out = normalize_fragment(html);
        assert_eq!(out.matches("inner").count(), 1, "{out:?}");
        let lines: Vec<&str> = out.lines().filter(|l| l.starts_with('|')).collect();
        assert_eq!(lines.len(), 3, "{out:?}");
        assert!(lines[2].contains("inner"));
    }

    #[test]
    fn caption_is_kept_above_grid() {
        let html = "<table><caption>賃金</caption><thead><tr><th>k</th></tr></thead>\
                    <tbody><tr><td>v</td></tr></tbody></table>";
        let out = normalize_fragment(html);
        assert_eq!(out, "\n\n賃金\n| k |\n| --- |\n| v |\n\n");
    }

    #[test]
    fn empty_table_renders_nothing() {
        assert_eq!(normalize_fragment("a<table></table>b"), "ab");
    }

    #[test]
    fn every_text_leaf_appears_in_order() {
        let html = r#"<div>alpha<span class="clr2">bravo</span><br>charlie
            <table><tr><th>delta</th></tr><tr><td><p>echo</p></td></tr></table>
            <p style="color: green">foxtrot<b>golf</b></p></div>"#;
        let out = normalize_fragment(html);

        let mut cursor = 0;
        for leaf in ["alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf"] {
            let found = out[cursor..]
                .find(leaf)
                .unwrap_or_else(|| panic!("{leaf} missing after offset {cursor} in {out:?}"));
            cursor += found + leaf.len();
            assert_eq!(out.matches(leaf).count(), 1, "{leaf} duplicated");
        }
    }
}
