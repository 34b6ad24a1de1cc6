// dot.rs — Graphviz DOT output for behavior graphs
//
// Renders flow edges as solid arrows labelled with their port, value edges
// (node outputs read by another node's ports) as dashed arrows, and the
// declared variables as a cluster of plain-text nodes per scope.
//
// Preconditions: none; dangling edges are drawn to placeholder nodes.
// Postconditions: output is deterministic for a given graph.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt::{self, Write};

use crate::graph::Graph;
use crate::id::NodeId;
use crate::node::Behavior;

/// Emit `graph` as a Graphviz DOT string.
pub fn emit_dot(graph: &Graph) -> String {
    let mut buf = String::new();
    // Writing into a String cannot fail.
    let _ = write_dot(&mut buf, graph);
    buf
}

fn write_dot(buf: &mut String, graph: &Graph) -> fmt::Result {
    writeln!(buf, "digraph \"{}\" {{", escape(&graph.name))?;
    writeln!(buf, "    rankdir=LR;")?;
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];")?;

    write_variables(buf, graph)?;

    writeln!(buf)?;
    for node in &graph.nodes {
        let (shape, style) = node_shape(&node.behavior);
        let label = match &node.label {
            Some(label) => format!("{}\\n{}", node.id, escape(label)),
            None => format!("{}\\n{}", node.id, node.behavior.name()),
        };
        writeln!(buf, "    {} [label=\"{label}\", shape={shape}{style}];", node.id)?;
    }

    let mut missing = BTreeSet::new();
    let known = |id: NodeId| id.index() < graph.nodes.len();

    writeln!(buf)?;
    writeln!(buf, "    // Flow edges")?;
    for node in &graph.nodes {
        for (port, target) in node.behavior.flow_ports() {
            let Some(target) = target else { continue };
            if !known(target) {
                missing.insert(target);
            }
            writeln!(buf, "    {} -> {target} [label=\"{port}\"];", node.id)?;
        }
        if let Behavior::Stop(stop) = &node.behavior {
            if !known(stop.node) {
                missing.insert(stop.node);
            }
            writeln!(
                buf,
                "    {} -> {} [label=\"stops\", style=dotted, color=red];",
                node.id, stop.node
            )?;
        }
    }

    writeln!(buf)?;
    writeln!(buf, "    // Value edges")?;
    for node in &graph.nodes {
        for (port, reference) in node.behavior.value_ports() {
            // One edge per (producer, output) even if read several times.
            let reads: BTreeSet<(NodeId, &str)> = reference.node_outputs().into_iter().collect();
            for (src, out) in reads {
                if !known(src) {
                    missing.insert(src);
                }
                writeln!(
                    buf,
                    "    {src} -> {} [label=\"{out} → {port}\", style=dashed, color=gray40];",
                    node.id
                )?;
            }
        }
    }

    if !missing.is_empty() {
        writeln!(buf)?;
        for id in missing {
            writeln!(buf, "    {id} [label=\"{id}?\", shape=point, color=red];")?;
        }
    }

    writeln!(buf, "}}")
}

fn write_variables(buf: &mut String, graph: &Graph) -> fmt::Result {
    for scope in graph.scopes.iter().filter(|s| !s.variables.is_empty()) {
        writeln!(buf)?;
        writeln!(buf, "    subgraph cluster_{} {{", scope.id)?;
        match scope.parent {
            Some(parent) => writeln!(buf, "        label=\"scope {} (in {parent})\";", scope.id)?,
            None => writeln!(buf, "        label=\"scope {}\";", scope.id)?,
        }
        writeln!(buf, "        style=rounded;")?;
        writeln!(buf, "        color=gray70;")?;
        for var in &scope.variables {
            let default = var
                .default
                .as_ref()
                .map(|v| format!(" = {}", escape(&v.to_string())))
                .unwrap_or_default();
            writeln!(
                buf,
                "        var_{}_{} [label=\"{}: {}{default}\", shape=plaintext];",
                scope.id,
                var.name,
                escape(&var.name),
                var.ty
            )?;
        }
        writeln!(buf, "    }}")?;
    }
    Ok(())
}

fn node_shape(behavior: &Behavior) -> (&'static str, &'static str) {
    match behavior {
        Behavior::Entry(_) => ("house", ", style=filled, fillcolor=palegreen"),
        Behavior::Wait(w) if w.parallel => ("octagon", ", style=filled, fillcolor=lightyellow"),
        Behavior::Wait(_) => ("octagon", ""),
        Behavior::Throw(_) => ("box", ", style=filled, fillcolor=mistyrose"),
        Behavior::Branch(_) => ("diamond", ""),
        b if b.is_value_node() => ("ellipse", ""),
        _ => ("box", ""),
    }
}

/// Escape a string for use inside a DOT quoted label.
fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
