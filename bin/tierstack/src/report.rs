//! Human-readable rendering of an assembled topology.

use anyhow::Context;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use tierstack_topology::{BuildPipeline, TopologyDocument};

/// One row per resource, in dependency order.
pub fn resource_table(document: &TopologyDocument) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Resource", "Kind", "Provenance", "Depends on"]);

    for node in &document.resources {
        table.add_row(vec![
            node.id.clone(),
            node.kind.to_string(),
            node.provenance.to_string(),
            node.depends_on.join("\n"),
        ]);
    }
    table
}

/// Source, domain mapping and build spec of the static site.
pub fn pipeline_summary(pipeline: &BuildPipeline) -> anyhow::Result<String> {
    let build_spec = pipeline
        .build_spec()
        .to_json_pretty()
        .context("Failed to render build spec")?;

    Ok(format!(
        "source: {}\ndomain: {}\nbuild spec:\n{build_spec}",
        pipeline.repository(),
        pipeline.domain_mapping(),
    ))
}
