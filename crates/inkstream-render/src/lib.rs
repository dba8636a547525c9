//! Streaming instruction renderer: append-only output tree, reveal queue,
//! collaborator seams and the chunk-parser contract.

pub mod collab;
pub mod instruction;
pub mod parser;
pub mod renderer;
pub mod reveal;
pub mod tree;

pub use instruction::{Instruction, InstructionKind};
pub use renderer::Renderer;
pub use tree::{NodeId, NodeKind, OutputTree};
