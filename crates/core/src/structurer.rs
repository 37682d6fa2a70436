use crate::blocks::{Block, BlockGraph, BlockKind};
use crate::config::StructureOptions;
use crate::models::{KeyValuePair, StructuredDocument, StructuredPage, Table};
use std::collections::BTreeMap;
use tracing::debug;

/// Turns a resolved block graph into page-indexed text, fields and tables.
#[derive(Debug, Clone, Default)]
pub struct DocumentStructurer {
    options: StructureOptions,
}

impl DocumentStructurer {
    pub fn new(options: StructureOptions) -> Self {
        Self { options }
    }

    pub fn structure(&self, graph: &BlockGraph) -> StructuredDocument {
        let mut by_page: BTreeMap<u32, Vec<&Block>> = BTreeMap::new();
        for block in graph.blocks() {
            by_page.entry(block.page_number()).or_default().push(block);
        }

        let pages = by_page
            .into_iter()
            .map(|(page, blocks)| (page, self.structure_page(graph, &blocks)))
            .collect();

        StructuredDocument { pages }
    }

    fn structure_page(&self, graph: &BlockGraph, blocks: &[&Block]) -> StructuredPage {
        let mut page = StructuredPage::default();

        for block in blocks {
            match &block.kind {
                BlockKind::KeyValue { .. } => {
                    if let Some(pair) = extract_pair(graph, block) {
                        page.key_value_pairs.push(pair);
                    }
                }
                BlockKind::Table { .. } => {
                    page.tables.push(self.extract_table(graph, block));
                }
                _ => {}
            }
        }

        // Form text is reported both as a field and as a line; keep the field.
        for block in blocks {
            if let BlockKind::Line { text, .. } = &block.kind {
                if !page.key_value_pairs.iter().any(|pair| pair.contains(text)) {
                    page.lines.push(text.clone());
                }
            }
        }

        page
    }

    fn extract_table(&self, graph: &BlockGraph, table: &Block) -> Table {
        let mut cells: Vec<(u32, u32, String)> = graph
            .table_cells(table)
            .filter_map(|cell| match &cell.kind {
                BlockKind::Cell { row, column, children } => {
                    Some((*row, *column, graph.word_text(children)))
                }
                _ => None,
            })
            .collect();

        if self.options.order_cells_by_column {
            cells.sort_by_key(|(_, column, _)| *column);
        }

        let mut result = Table::default();
        for (row, _, text) in cells {
            match row {
                0 => debug!(table = %table.id, "skipping cell without a row index"),
                1 => result.header.push(text),
                _ => {
                    let position = (row - 2) as usize;
                    if result.rows.len() <= position {
                        result.rows.resize_with(position + 1, Vec::new);
                    }
                    result.rows[position].push(text);
                }
            }
        }

        result
    }
}

fn extract_pair(graph: &BlockGraph, block: &Block) -> Option<KeyValuePair> {
    let (key, value) = graph.key_value(block)?;
    let key = key
        .trim_end()
        .strip_suffix(':')
        .map(|stripped| stripped.trim_end().to_string())
        .unwrap_or(key);

    if key.is_empty() && value.is_empty() {
        return None;
    }
    Some(KeyValuePair { key, value })
}

/// Renders one page into the `Text:` / `Key-Value Pairs:` / `Tables:` text
/// envelope consumed by the cleaner, the embedder and the answer engine.
pub fn render_page_text(page_number: u32, page: &StructuredPage) -> String {
    let mut output = String::from("Text:\n");
    if page.lines.is_empty() {
        output.push_str(&format!("This page {page_number} is blank"));
    } else {
        output.push_str(&page.lines.join("\n"));
    }

    if !page.key_value_pairs.is_empty() {
        output.push_str("\nKey-Value Pairs:");
        for pair in &page.key_value_pairs {
            output.push_str(&format!("\n  {}: {}", pair.key, pair.value));
        }
    }

    if !page.tables.is_empty() {
        output.push_str("\nTables:");
        for (index, table) in page.tables.iter().enumerate() {
            output.push_str(&format!("\n  Table {}:", index + 1));
            output.push_str(&format!("\n    Column Header: {}", table.header.join(", ")));
            for (row_index, row) in table.rows.iter().enumerate() {
                output.push_str(&format!("\n    Row{}: {}", row_index + 1, row.join(", ")));
            }
        }
    }

    output
}

impl StructuredDocument {
    pub fn page_texts(&self) -> BTreeMap<u32, String> {
        self.pages
            .iter()
            .map(|(page, content)| (*page, render_page_text(*page, content)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::fixtures::{cell, key, line, raw, value, with_children, word};
    use crate::blocks::RawBlock;
    use proptest::prelude::*;

    fn structure(blocks: &[RawBlock]) -> StructuredDocument {
        DocumentStructurer::default().structure(&BlockGraph::from_raw(blocks))
    }

    #[test]
    fn lines_fields_and_pages_are_grouped() {
        let blocks = vec![
            line("l3", 2, "Discharge instructions"),
            line("l1", 1, "Emergency Department Record"),
            key("k1", 1, &["w1", "w2"], &["v1"]),
            value("v1", 1, &["w3"]),
            word("w1", 1, "Patient"),
            word("w2", 1, "Name:"),
            word("w3", 1, "Doe"),
            line("l2", 1, "Patient Name: Doe"),
            line("l4", 1, "Doe"),
        ];

        let document = structure(&blocks);
        assert_eq!(document.pages.keys().copied().collect::<Vec<_>>(), vec![1, 2]);

        let first = &document.pages[&1];
        assert_eq!(first.key_value_pairs, vec![KeyValuePair::new("Patient Name", "Doe")]);
        assert_eq!(
            first.lines,
            vec![
                "Emergency Department Record".to_string(),
                "Patient Name: Doe".to_string()
            ]
        );
        assert_eq!(document.pages[&2].lines, vec!["Discharge instructions".to_string()]);
    }

    #[test]
    fn line_before_its_field_is_still_deduplicated() {
        let blocks = vec![
            line("l1", 1, "Room"),
            key("k1", 1, &["w1"], &["v1"]),
            value("v1", 1, &["w2"]),
            word("w1", 1, "Room:"),
            word("w2", 1, "412B"),
        ];

        let document = structure(&blocks);
        assert!(document.pages[&1].lines.is_empty());
        assert_eq!(
            document.pages[&1].key_value_pairs,
            vec![KeyValuePair::new("Room", "412B")]
        );
    }

    #[test]
    fn empty_lines_survive_next_to_fields() {
        let blocks = vec![
            key("k1", 1, &["w1"], &["v1"]),
            value("v1", 1, &["w2"]),
            word("w1", 1, "Bed:"),
            word("w2", 1, "7"),
            line("l1", 1, ""),
        ];

        let document = structure(&blocks);
        assert_eq!(document.pages[&1].lines, vec![String::new()]);
    }

    #[test]
    fn empty_pairs_are_dropped_and_blocks_default_to_page_one() {
        let mut orphan = key("k1", 1, &[], &[]);
        orphan.page = None;
        let document = structure(&[orphan]);

        assert_eq!(document.pages.len(), 1);
        assert!(document.pages[&1].is_empty());
    }

    #[test]
    fn tables_use_header_row_and_dense_rows() {
        let blocks = vec![
            with_children(raw("t1", "TABLE", Some(1)), &["c4", "c1", "c2", "c3", "c5"]),
            cell("c1", 1, 1, 1, &["w1"]),
            cell("c2", 1, 1, 2, &["w2"]),
            cell("c3", 1, 3, 1, &["w3"]),
            cell("c4", 1, 2, 2, &["w4"]),
            cell("c5", 1, 3, 2, &[]),
            word("w1", 1, "Drug"),
            word("w2", 1, "Route"),
            word("w3", 1, "Cefazolin"),
            word("w4", 1, "IV"),
        ];

        let table = &structure(&blocks).pages[&1].tables[0];
        assert_eq!(table.header, vec!["Drug".to_string(), "Route".to_string()]);
        assert_eq!(
            table.rows,
            vec![
                vec!["IV".to_string()],
                vec!["Cefazolin".to_string(), String::new()]
            ]
        );
    }

    #[test]
    fn column_ordering_is_opt_in() {
        let blocks = vec![
            with_children(raw("t1", "TABLE", Some(1)), &["c2", "c1"]),
            cell("c1", 1, 1, 1, &["w1"]),
            cell("c2", 1, 1, 2, &["w2"]),
            word("w1", 1, "Date"),
            word("w2", 1, "Event"),
        ];
        let graph = BlockGraph::from_raw(&blocks);

        let encounter = DocumentStructurer::default().structure(&graph);
        assert_eq!(encounter.pages[&1].tables[0].header, vec!["Event", "Date"]);

        let ordered = DocumentStructurer::new(StructureOptions {
            order_cells_by_column: true,
        })
        .structure(&graph);
        assert_eq!(ordered.pages[&1].tables[0].header, vec!["Date", "Event"]);
    }

    #[test]
    fn rendering_marks_blank_pages() {
        let page = StructuredPage {
            lines: Vec::new(),
            key_value_pairs: vec![KeyValuePair::new("Unit", "ICU")],
            tables: vec![Table {
                header: vec!["A".to_string(), "B".to_string()],
                rows: vec![vec!["1".to_string(), "2".to_string()]],
            }],
        };

        assert_eq!(
            render_page_text(4, &page),
            "Text:\nThis page 4 is blank\nKey-Value Pairs:\n  Unit: ICU\nTables:\n  Table 1:\n    Column Header: A, B\n    Row1: 1, 2"
        );
    }

    proptest! {
        #[test]
        fn table_rows_are_dense_by_row_index(rows in proptest::collection::vec(1u32..8, 1..30)) {
            let mut blocks = Vec::new();
            let mut cell_ids = Vec::new();
            for (position, row) in rows.iter().enumerate() {
                let id = format!("c{position}");
                blocks.push(cell(&id, 1, *row, 1, &[]));
                cell_ids.push(id);
            }
            let ids: Vec<&str> = cell_ids.iter().map(String::as_str).collect();
            blocks.push(with_children(raw("t", "TABLE", Some(1)), &ids));

            let table = &structure(&blocks).pages[&1].tables[0];
            let max_row = *rows.iter().max().unwrap_or(&1);
            prop_assert_eq!(table.rows.len(), (max_row - 1) as usize);
            prop_assert_eq!(table.header.len(), rows.iter().filter(|row| **row == 1).count());
            for (position, cells) in table.rows.iter().enumerate() {
                let expected = rows.iter().filter(|row| **row as usize == position + 2).count();
                prop_assert_eq!(cells.len(), expected);
            }
        }

        #[test]
        fn output_pages_match_input_pages(pages in proptest::collection::vec(1u32..20, 0..40)) {
            let blocks: Vec<RawBlock> = pages
                .iter()
                .enumerate()
                .map(|(position, page)| line(&format!("l{position}"), *page, "text"))
                .collect();

            let document = structure(&blocks);
            let mut expected: Vec<u32> = pages.clone();
            expected.sort_unstable();
            expected.dedup();
            prop_assert_eq!(document.pages.keys().copied().collect::<Vec<_>>(), expected);
        }
    }
}
