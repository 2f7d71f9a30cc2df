//! Pseudo-C rendering of kernels for logs and tests

use super::{Allocate, Compute, ForLoop, IfThenElse, IrVisitor, Kernel, Scope};
use crate::ir::TensorGraph;

pub struct KernelPrinter<'a> {
    graph: &'a TensorGraph,
    buffer: String,
    indent_level: usize,
}

impl<'a> KernelPrinter<'a> {
    const INDENT_SIZE: usize = 4;

    pub fn new(graph: &'a TensorGraph) -> Self {
        Self {
            graph,
            buffer: String::new(),
            indent_level: 0,
        }
    }

    pub fn render(mut self, kernel: &Kernel) -> String {
        self.visit_scope(&kernel.body);
        self.buffer
    }

    pub fn render_scope(mut self, scope: &Scope) -> String {
        self.visit_scope(scope);
        self.buffer
    }

    fn line(&mut self, text: &str) {
        self.buffer
            .push_str(&" ".repeat(self.indent_level * Self::INDENT_SIZE));
        self.buffer.push_str(text);
        self.buffer.push('\n');
    }

    fn inc_indent(&mut self) {
        self.indent_level += 1;
    }

    fn dec_indent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }
}

impl IrVisitor for KernelPrinter<'_> {
    fn visit_for_loop(&mut self, fl: &ForLoop) {
        let mut header = format!("for {} in {}..{}", fl.index, fl.start, fl.stop);
        if !fl.step.is_one() {
            header.push_str(&format!(" step {}", fl.step));
        }
        header.push_str(" {");
        self.line(&header);
        self.inc_indent();
        self.visit_scope(&fl.body);
        self.dec_indent();
        self.line("}");
    }

    fn visit_if_then_else(&mut self, ite: &IfThenElse) {
        self.line(&format!("if {} {{", ite.predicate));
        self.inc_indent();
        self.visit_scope(&ite.then_body);
        self.dec_indent();
        if !ite.else_body.is_empty() {
            self.line("} else {");
            self.inc_indent();
            self.visit_scope(&ite.else_body);
            self.dec_indent();
        }
        self.line("}");
    }

    fn visit_allocate(&mut self, alloc: &Allocate) {
        let mut text = format!(
            "alloc {}[{}] {}",
            self.graph.value_name(alloc.buffer),
            alloc.size,
            alloc.memory
        );
        if alloc.zero_init {
            text.push_str(" zero");
        }
        self.line(&text);
    }

    fn visit_barrier(&mut self) {
        self.line("barrier");
    }

    fn visit_compute(&mut self, compute: &Compute) {
        let text = match compute {
            Compute::Op(op) => {
                let op = self.graph.op(*op);
                let names = |values: &[crate::ir::Value]| {
                    values
                        .iter()
                        .map(|v| self.graph.value_name(*v))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                format!("{} = {}({})", names(&op.outputs), op.kind.name(), names(&op.inputs))
            }
            Compute::InitReduction { tensor, value } => {
                format!("init {} = {}", self.graph.tensor(*tensor).name, value)
            }
        };
        self.line(&text);
    }
}
