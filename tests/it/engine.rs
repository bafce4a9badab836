//! A signing engine driven by a script, recording what it is shown.

use apkzip::DataSource;
use apkzip::io::DataSink;
use apkzip::signer::{
    InputJarEntryInstructions, InspectJarEntryRequest, JarEntry, OutputApkSigningBlockRequest,
    OutputJarSignatureRequest, OutputPolicy, SigningEngine,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Everything the engine observed, shared with its requests.
#[derive(Debug, Default)]
pub struct Observed {
    /// Callbacks in order, e.g. `input:classes.dex`.
    pub events: Vec<String>,
    /// Inspected data keyed by `input:NAME` or `output:NAME`.
    pub inspected: HashMap<String, Vec<u8>>,
    pub input_signing_block: Option<Vec<u8>>,
    /// `(before CD, CD, EOCD)` as of the last `output_zip_sections` call.
    pub zip_sections: Option<(Vec<u8>, Vec<u8>, Vec<u8>)>,
    pub zip_sections_calls: usize,
}

#[derive(Default)]
pub struct ScriptedEngine {
    pub policies: HashMap<String, OutputPolicy>,
    pub inspect_input: Vec<String>,
    pub inspect_output: Vec<String>,
    pub additional: Vec<JarEntry>,
    pub signing_block: Option<Vec<u8>>,
    pub padding_before: usize,
    /// Grow the signing block by one byte on every request.
    pub growing_block: bool,
    pub fail_on: Option<String>,
    pub observed: Rc<RefCell<Observed>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(mut self, name: &str, policy: OutputPolicy) -> Self {
        self.policies.insert(name.to_string(), policy);
        self
    }

    pub fn inspect_input(mut self, name: &str) -> Self {
        self.inspect_input.push(name.to_string());
        self
    }

    pub fn inspect_output(mut self, name: &str) -> Self {
        self.inspect_output.push(name.to_string());
        self
    }

    pub fn add(mut self, name: &str, data: &[u8]) -> Self {
        self.additional.push(JarEntry::new(name, data));
        self
    }

    pub fn signing_block(mut self, block: Vec<u8>, padding_before: usize) -> Self {
        self.signing_block = Some(block);
        self.padding_before = padding_before;
        self
    }

    pub fn fail_on(mut self, name: &str) -> Self {
        self.fail_on = Some(name.to_string());
        self
    }

    fn event(&self, event: String) {
        self.observed.borrow_mut().events.push(event);
    }

    fn collector(&self, key: String, name: &str) -> Box<dyn InspectJarEntryRequest> {
        Box::new(Collector {
            name: name.to_string(),
            key,
            data: Vec::new(),
            observed: Rc::clone(&self.observed),
        })
    }
}

struct Collector {
    name: String,
    key: String,
    data: Vec<u8>,
    observed: Rc<RefCell<Observed>>,
}

impl InspectJarEntryRequest for Collector {
    fn entry_name(&self) -> &str {
        &self.name
    }

    fn data_sink(&mut self) -> &mut dyn DataSink {
        &mut self.data
    }

    fn done(&mut self) -> anyhow::Result<()> {
        let data = std::mem::take(&mut self.data);
        let mut observed = self.observed.borrow_mut();
        observed.events.push(format!("done:{}", self.key));
        observed.inspected.insert(self.key.clone(), data);
        Ok(())
    }
}

struct AdditionalEntries {
    entries: Vec<JarEntry>,
    observed: Rc<RefCell<Observed>>,
}

impl OutputJarSignatureRequest for AdditionalEntries {
    fn additional_jar_entries(&self) -> &[JarEntry] {
        &self.entries
    }

    fn done(&mut self) -> anyhow::Result<()> {
        self.observed
            .borrow_mut()
            .events
            .push("done:entries".to_string());
        Ok(())
    }
}

struct SigningBlock {
    block: Vec<u8>,
    padding_before: usize,
    observed: Rc<RefCell<Observed>>,
}

impl OutputApkSigningBlockRequest for SigningBlock {
    fn padding_before(&self) -> usize {
        self.padding_before
    }

    fn apk_signing_block(&self) -> &[u8] {
        &self.block
    }

    fn done(&mut self) -> anyhow::Result<()> {
        self.observed
            .borrow_mut()
            .events
            .push("done:block".to_string());
        Ok(())
    }
}

impl SigningEngine for ScriptedEngine {
    fn input_apk_signing_block(&mut self, block: Option<&DataSource>) -> anyhow::Result<()> {
        let block = block.map(|b| b.to_vec()).transpose()?;
        let mut observed = self.observed.borrow_mut();
        observed.events.push("signing_block".to_string());
        observed.input_signing_block = block;
        Ok(())
    }

    fn input_jar_entry(&mut self, name: &str) -> anyhow::Result<InputJarEntryInstructions> {
        self.event(format!("input:{name}"));
        if self.fail_on.as_deref() == Some(name) {
            anyhow::bail!("refusing {name}");
        }
        let policy = self
            .policies
            .get(name)
            .copied()
            .unwrap_or(OutputPolicy::Output);
        let mut instructions = InputJarEntryInstructions::new(policy);
        if self.inspect_input.iter().any(|n| n == name) {
            instructions = instructions.with_inspect(self.collector(format!("input:{name}"), name));
        }
        Ok(instructions)
    }

    fn output_jar_entry(
        &mut self,
        name: &str,
    ) -> anyhow::Result<Option<Box<dyn InspectJarEntryRequest>>> {
        self.event(format!("output:{name}"));
        if self.inspect_output.iter().any(|n| n == name) {
            return Ok(Some(self.collector(format!("output:{name}"), name)));
        }
        Ok(None)
    }

    fn output_jar_entries(&mut self) -> anyhow::Result<Option<Box<dyn OutputJarSignatureRequest>>> {
        self.event("entries".to_string());
        if self.additional.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(AdditionalEntries {
            entries: self.additional.clone(),
            observed: Rc::clone(&self.observed),
        })))
    }

    fn output_zip_sections(
        &mut self,
        before_central_directory: &DataSource,
        central_directory: &DataSource,
        eocd: &DataSource,
    ) -> anyhow::Result<Option<Box<dyn OutputApkSigningBlockRequest>>> {
        {
            let mut observed = self.observed.borrow_mut();
            observed.events.push("zip_sections".to_string());
            observed.zip_sections_calls += 1;
            observed.zip_sections = Some((
                before_central_directory.to_vec()?,
                central_directory.to_vec()?,
                eocd.to_vec()?,
            ));
        }

        let Some(block) = &self.signing_block else {
            return Ok(None);
        };
        let mut block = block.clone();
        if self.growing_block {
            let calls = self.observed.borrow().zip_sections_calls;
            block.resize(block.len() + calls, 0);
        }
        Ok(Some(Box::new(SigningBlock {
            block,
            padding_before: self.padding_before,
            observed: Rc::clone(&self.observed),
        })))
    }

    fn output_done(&mut self) -> anyhow::Result<()> {
        self.event("done".to_string());
        Ok(())
    }
}
