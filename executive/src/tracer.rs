//! Standard execution tracer: one structured record per opcode.

use serde_json::{json, Map, Value};
use tracing::warn;

use crate::instructions::Instruction;
use crate::vm::{VmStep, VmStepExt};

/// What the standard tracer records per step.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceOptions {
    /// Omit the stack dump.
    pub disable_stack: bool,
    /// Omit memory dumps.
    pub disable_memory: bool,
    /// Omit storage dumps.
    pub disable_storage: bool,
    /// Dump storage on every step instead of only after writes.
    pub full_storage: bool,
}

/// Per-opcode tracer producing geth-style structured step records.
///
/// Memory is dumped only when the previous instruction changed it (or a
/// new context started); storage likewise, unless `full_storage` asks
/// for every step. Frame transitions are inferred by comparing the
/// reported depth against an internal instruction stack.
#[derive(Debug, Default)]
pub struct StandardTrace {
    options: TraceOptions,
    show_mnemonics: bool,
    last_inst: Vec<Instruction>,
    trace: Vec<Value>,
}

impl StandardTrace {
    /// A tracer with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracer with the given options.
    pub fn with_options(options: TraceOptions) -> Self {
        Self { options, ..Self::default() }
    }

    /// Also record the instruction mnemonic per step.
    pub fn show_mnemonics(mut self) -> Self {
        self.show_mnemonics = true;
        self
    }

    /// The recorded step objects.
    pub fn entries(&self) -> &[Value] {
        &self.trace
    }

    /// The whole trace as JSON, optionally pretty-printed.
    pub fn json(&self, styled: bool) -> String {
        let value = Value::Array(self.trace.clone());
        if styled {
            serde_json::to_string_pretty(&value).unwrap_or_default()
        } else {
            serde_json::to_string(&value).unwrap_or_default()
        }
    }

    /// The tracer callback body; pass
    /// `|step, ext| tracer.observe(step, ext)` as the executive's
    /// `on_op`.
    pub fn observe(&mut self, step: &VmStep<'_>, ext: &VmStepExt<'_>) {
        let mut record = Map::new();

        if !self.options.disable_stack {
            let stack: Vec<String> =
                step.stack.iter().map(|value| format!("{value:#x}")).collect();
            record.insert("stack".into(), json!(stack));
        }

        // Infer frame transitions from the reported depth. One pushed or
        // popped frame between steps is the normal case; anything larger
        // means the backend skipped boundaries, so resynchronize.
        let mut new_context = false;
        let mut last_inst = Instruction::STOP;
        let depth = ext.depth;
        if self.last_inst.len() == depth {
            self.last_inst.push(step.instruction);
            new_context = true;
        } else if self.last_inst.len() == depth + 2 {
            self.last_inst.pop();
            if let Some(previous) = self.last_inst.last() {
                last_inst = *previous;
            }
        } else if self.last_inst.len() == depth + 1 {
            if let Some(previous) = self.last_inst.last() {
                last_inst = *previous;
            }
            if let Some(slot) = self.last_inst.last_mut() {
                *slot = step.instruction;
            }
        } else {
            warn!(
                target: "tracer",
                tracked = self.last_inst.len(),
                depth,
                "more than one new or deleted stack frame between steps; resynchronizing"
            );
            self.last_inst.resize(depth + 1, step.instruction);
        }

        if !self.options.disable_memory && (last_inst.changes_memory() || new_context) {
            let memory: Vec<String> = step
                .memory
                .chunks(32)
                .map(|chunk| chunk.iter().map(|byte| format!("{byte:02x}")).collect())
                .collect();
            record.insert("memory".into(), json!(memory));
        }

        if !self.options.disable_storage
            && (self.options.full_storage || last_inst.changes_storage() || new_context)
        {
            let mut storage = Map::new();
            for (key, value) in ext.storage {
                storage.insert(format!("{key:#x}"), json!(format!("{value:#x}")));
            }
            record.insert("storage".into(), Value::Object(storage));
        }

        if self.show_mnemonics {
            record.insert("op".into(), json!(step.instruction.mnemonic()));
        }
        record.insert("pc".into(), json!(step.pc.to_string()));
        record.insert("gas".into(), json!(step.gas.to_string()));
        record.insert("gasCost".into(), json!(step.gas_cost.to_string()));
        if let Some(new_mem_size) = step.new_mem_size {
            if new_mem_size != 0 {
                record.insert("memexpand".into(), json!(new_mem_size.to_string()));
            }
        }

        self.trace.push(Value::Object(record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use std::collections::BTreeMap;

    fn step<'a>(
        pc: u64,
        instruction: Instruction,
        stack: &'a [U256],
        memory: &'a [u8],
    ) -> VmStep<'a> {
        VmStep {
            steps: pc,
            pc,
            instruction,
            new_mem_size: None,
            gas_cost: U256::from(3),
            gas: U256::from(1000),
            stack,
            memory,
        }
    }

    #[test]
    fn test_memory_dumped_only_after_memory_writes() {
        let mut tracer = StandardTrace::new().show_mnemonics();
        let storage = BTreeMap::new();
        let ext = VmStepExt { depth: 0, my_address: Address::ZERO, storage: &storage };
        let stack = [U256::from(1)];
        let memory = vec![0u8; 64];

        // First step opens the context: memory and storage are dumped.
        tracer.observe(&step(0, Instruction::PUSH1, &stack, &memory), &ext);
        // PUSH1 does not change memory, so the second step omits it.
        tracer.observe(&step(2, Instruction::MSTORE, &stack, &memory), &ext);
        // The step after MSTORE dumps memory again.
        tracer.observe(&step(3, Instruction::STOP, &stack, &memory), &ext);

        let entries = tracer.entries();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].get("memory").is_some());
        assert!(entries[1].get("memory").is_none());
        assert!(entries[2].get("memory").is_some());
        assert_eq!(entries[1]["op"], "MSTORE");
        // Two 32-byte rows.
        assert_eq!(entries[0]["memory"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_storage_dumped_after_sstore() {
        let mut tracer = StandardTrace::new();
        let storage = BTreeMap::from([(U256::from(1), U256::from(42))]);
        let ext = VmStepExt { depth: 0, my_address: Address::ZERO, storage: &storage };
        let stack: [U256; 0] = [];

        tracer.observe(&step(0, Instruction::SSTORE, &stack, &[]), &ext);
        tracer.observe(&step(1, Instruction::ADD, &stack, &[]), &ext);
        tracer.observe(&step(2, Instruction::STOP, &stack, &[]), &ext);

        let entries = tracer.entries();
        // Step 0 is a new context, step 1 follows the SSTORE.
        assert!(entries[0].get("storage").is_some());
        assert!(entries[1].get("storage").is_some());
        assert!(entries[2].get("storage").is_none());
        assert_eq!(entries[1]["storage"]["0x1"], "0x2a");
    }

    #[test]
    fn test_frame_push_and_pop_are_tracked() {
        let mut tracer = StandardTrace::new();
        let storage = BTreeMap::new();
        let stack: [U256; 0] = [];

        let outer = VmStepExt { depth: 0, my_address: Address::ZERO, storage: &storage };
        let inner = VmStepExt { depth: 1, my_address: Address::ZERO, storage: &storage };

        tracer.observe(&step(0, Instruction::CALL, &stack, &[]), &outer);
        // Callee frame: depth grew by one, a new context.
        tracer.observe(&step(0, Instruction::PUSH1, &stack, &[]), &inner);
        tracer.observe(&step(2, Instruction::STOP, &stack, &[]), &inner);
        // Back in the caller: the step after the popped frame sees the
        // caller's CALL as the previous instruction, so memory reappears.
        tracer.observe(&step(1, Instruction::STOP, &stack, &[]), &outer);

        let entries = tracer.entries();
        assert_eq!(entries.len(), 4);
        assert!(entries[1].get("memory").is_some(), "new context dumps memory");
        assert!(entries[3].get("memory").is_some(), "return from call dumps memory");
    }

    #[test]
    fn test_survives_skipped_frame_boundaries() {
        let mut tracer = StandardTrace::new();
        let storage = BTreeMap::new();
        let stack: [U256; 0] = [];

        let outer = VmStepExt { depth: 0, my_address: Address::ZERO, storage: &storage };
        let deep = VmStepExt { depth: 3, my_address: Address::ZERO, storage: &storage };

        tracer.observe(&step(0, Instruction::CALL, &stack, &[]), &outer);
        // Three frames appeared at once; the tracer resynchronizes
        // instead of panicking.
        tracer.observe(&step(0, Instruction::PUSH1, &stack, &[]), &deep);
        tracer.observe(&step(1, Instruction::STOP, &stack, &[]), &outer);

        assert_eq!(tracer.entries().len(), 3);
    }

    #[test]
    fn test_json_output_parses() {
        let mut tracer = StandardTrace::new().show_mnemonics();
        let storage = BTreeMap::new();
        let ext = VmStepExt { depth: 0, my_address: Address::ZERO, storage: &storage };
        let stack = [U256::from(7)];
        tracer.observe(&step(0, Instruction::PUSH1, &stack, &[]), &ext);

        let parsed: Vec<Value> = serde_json::from_str(&tracer.json(false)).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["pc"], "0");
        assert_eq!(parsed[0]["stack"][0], "0x7");

        assert!(tracer.json(true).contains('\n'));
    }
}
