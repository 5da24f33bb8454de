//! C8: a per-real-channel DAG of audio-thread nodes, topologically sorted
//! once at build time and walked per block thereafter.

use amplitude_dsp::AudioBuffer;

pub type NodeId = u32;

pub trait Node: Send {
    fn id(&self) -> NodeId;
    fn reset(&mut self);
    fn providers(&self) -> &[NodeId];

    /// Pulls this node's output. Producers (Input, Processor, Mixer) are
    /// expected to implement this; Output nodes return an empty slice.
    fn provide(&mut self, inputs: &[&AudioBuffer]) -> &AudioBuffer;
}

/// Sources a layer's decoded/resampled audio. Holds no providers.
pub struct InputNode {
    id: NodeId,
    buffer: AudioBuffer,
}

impl InputNode {
    pub fn new(id: NodeId, frames: usize, channels: usize) -> Self {
        Self {
            id,
            buffer: AudioBuffer::new(frames, channels),
        }
    }

    pub fn fill(&mut self, source: &AudioBuffer) {
        self.buffer.copy_from(source, 0, 0, source.frame_count());
    }
}

impl Node for InputNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn providers(&self) -> &[NodeId] {
        &[]
    }

    fn provide(&mut self, _inputs: &[&AudioBuffer]) -> &AudioBuffer {
        &self.buffer
    }
}

/// Consumes one provider, produces a new buffer. In-place-safe: may write
/// its result back over the provider's buffer contents.
pub struct ProcessorNode {
    id: NodeId,
    provider: NodeId,
    buffer: AudioBuffer,
    process: Box<dyn FnMut(&AudioBuffer, &mut AudioBuffer) + Send>,
}

impl ProcessorNode {
    pub fn new(
        id: NodeId,
        provider: NodeId,
        frames: usize,
        channels: usize,
        process: impl FnMut(&AudioBuffer, &mut AudioBuffer) + Send + 'static,
    ) -> Self {
        Self {
            id,
            provider,
            buffer: AudioBuffer::new(frames, channels),
            process: Box::new(process),
        }
    }
}

impl Node for ProcessorNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn providers(&self) -> &[NodeId] {
        std::slice::from_ref(&self.provider)
    }

    fn provide(&mut self, inputs: &[&AudioBuffer]) -> &AudioBuffer {
        (self.process)(inputs[0], &mut self.buffer);
        &self.buffer
    }
}

/// Consumes N providers, sums them into one internally-allocated mix
/// buffer sized at construction time to the engine's block size.
pub struct MixerNode {
    id: NodeId,
    providers: Vec<NodeId>,
    buffer: AudioBuffer,
}

impl MixerNode {
    pub fn new(id: NodeId, providers: Vec<NodeId>, frames: usize, channels: usize) -> Self {
        Self {
            id,
            providers,
            buffer: AudioBuffer::new(frames, channels),
        }
    }
}

impl Node for MixerNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn providers(&self) -> &[NodeId] {
        &self.providers
    }

    fn provide(&mut self, inputs: &[&AudioBuffer]) -> &AudioBuffer {
        for input in inputs {
            for c in 0..self.buffer.channel_count() {
                self.buffer.channel_mut(c).add_assign(&input.channel(c));
            }
        }
        &self.buffer
    }
}

/// Terminal node: consumes one provider and writes into the layer's
/// engine-owned output buffer.
pub struct OutputNode {
    id: NodeId,
    provider: NodeId,
    pub output: AudioBuffer,
}

impl OutputNode {
    pub fn new(id: NodeId, provider: NodeId, frames: usize, channels: usize) -> Self {
        Self {
            id,
            provider,
            output: AudioBuffer::new(frames, channels),
        }
    }
}

impl Node for OutputNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn reset(&mut self) {
        self.output.clear();
    }

    fn providers(&self) -> &[NodeId] {
        std::slice::from_ref(&self.provider)
    }

    fn provide(&mut self, inputs: &[&AudioBuffer]) -> &AudioBuffer {
        self.output.copy_from(inputs[0], 0, 0, inputs[0].frame_count());
        &self.output
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline graph contains a cycle")]
    Cyclic,
    #[error("node {0} references unknown provider {1}")]
    UnknownProvider(NodeId, NodeId),
}

/// A DAG of nodes, validated acyclic and topologically sorted once at
/// construction; `run` re-walks that fixed order every audio block.
pub struct Pipeline {
    nodes: Vec<Box<dyn Node>>,
    order: Vec<usize>,
    last_output: Vec<Option<AudioBuffer>>,
}

impl Pipeline {
    pub fn build(nodes: Vec<Box<dyn Node>>) -> Result<Self, PipelineError> {
        let index_of = |id: NodeId, nodes: &[Box<dyn Node>]| nodes.iter().position(|n| n.id() == id);

        let mut in_degree = vec![0usize; nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for &provider in node.providers() {
                let provider_index =
                    index_of(provider, &nodes).ok_or(PipelineError::UnknownProvider(node.id(), provider))?;
                dependents[provider_index].push(i);
                in_degree[i] += 1;
            }
        }

        let mut queue: std::collections::VecDeque<usize> =
            in_degree.iter().enumerate().filter(|(_, &d)| d == 0).map(|(i, _)| i).collect();
        let mut order = Vec::with_capacity(nodes.len());
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() != nodes.len() {
            return Err(PipelineError::Cyclic);
        }

        let last_output = (0..nodes.len()).map(|_| None).collect();
        Ok(Self { nodes, order, last_output })
    }

    /// Runs one audio block: resets every node, then walks the fixed topo
    /// order pulling `provide()` from each node's providers and caching
    /// the result so later nodes (and `output()`) can read it back.
    pub fn run(&mut self) {
        for node in &mut self.nodes {
            node.reset();
        }
        for slot in &mut self.last_output {
            *slot = None;
        }
        for &index in &self.order {
            let provider_ids: Vec<NodeId> = self.nodes[index].providers().to_vec();
            let input_buffers: Vec<AudioBuffer> = provider_ids
                .iter()
                .map(|provider_id| {
                    let provider_index = self.nodes.iter().position(|n| n.id() == *provider_id).unwrap();
                    self.last_output[provider_index]
                        .as_ref()
                        .expect("provider produced before its dependents in topo order")
                        .clone_buffer()
                })
                .collect();
            let input_refs: Vec<&AudioBuffer> = input_buffers.iter().collect();
            self.last_output[index] = Some(self.nodes[index].provide(&input_refs).clone_buffer());
        }
    }

    pub fn output(&self, node_id: NodeId) -> Option<&AudioBuffer> {
        let index = self.nodes.iter().position(|n| n.id() == node_id)?;
        self.last_output[index].as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topo_sort_orders_input_before_output() {
        let input = InputNode::new(0, 16, 1);
        let output = OutputNode::new(1, 0, 16, 1);
        let pipeline = Pipeline::build(vec![Box::new(input), Box::new(output)]);
        assert!(pipeline.is_ok());
    }

    #[test]
    fn cyclic_graph_is_rejected() {
        let a = ProcessorNode::new(0, 1, 16, 1, |_src, _dst| {});
        let b = ProcessorNode::new(1, 0, 16, 1, |_src, _dst| {});
        let result = Pipeline::build(vec![Box::new(a), Box::new(b)]);
        assert!(matches!(result, Err(PipelineError::Cyclic)));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let output = OutputNode::new(0, 99, 16, 1);
        let result = Pipeline::build(vec![Box::new(output)]);
        assert!(matches!(result, Err(PipelineError::UnknownProvider(0, 99))));
    }
}
