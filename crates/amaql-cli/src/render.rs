//! Terminal rendering of query results.

use amaql_graphdb::{Edge, MatchedPath, PathElement, QueryOutput, Vertex};
use colored::Colorize;

fn vertex_label(vertex: &Vertex) -> String {
    let types: Vec<&str> = vertex.types.iter().map(String::as_str).collect();
    format!("({} '{}' {})", vertex.id, vertex.name, types.join("|"))
}

fn edge_label(edge: &Edge) -> String {
    let types: Vec<&str> = edge.types.iter().map(String::as_str).collect();
    let glyph = if edge.is_derived() { "=" } else { "-" };
    format!("{glyph}[{}]{glyph}", types.join(","))
}

/// One line per path, elements in chain order.
pub fn path_line(path: &MatchedPath) -> String {
    path.elements
        .iter()
        .map(|element| match element {
            PathElement::Vertex(v) => vertex_label(v),
            PathElement::Edge(e) => edge_label(e),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn print_output(output: &QueryOutput) {
    match output {
        QueryOutput::Paths(paths) => {
            for (index, path) in paths.iter().enumerate() {
                println!("{} {}", format!("{:>3}.", index + 1).dimmed(), path_line(path));
            }
        }
        QueryOutput::ScopeList(vertices) => {
            for vertex in vertices {
                println!("{} {}", "•".cyan(), vertex_label(vertex));
            }
        }
    }
    let noun = match output {
        QueryOutput::Paths(_) => "path(s)",
        QueryOutput::ScopeList(_) => "vertex(es)",
    };
    eprintln!("{} {} {noun}", "ok".green().bold(), output.len());
}
