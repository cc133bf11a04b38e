//! Definition serializers - turn a [`DomainDefinition`] into the document the
//! hypervisor consumes on define.

use thiserror::Error;

use crate::spec::{DiskConfig, DomainDefinition, NicConfig};

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("invalid domain definition: {0}")]
    Invalid(String),
}

/// Converts a domain definition into an opaque hypervisor document.
pub trait DefinitionSerializer: Send + Sync {
    fn serialize(&self, definition: &DomainDefinition) -> Result<Vec<u8>, SerializeError>;
}

/// Renders libvirt domain XML for KVM guests.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibvirtXml;

impl DefinitionSerializer for LibvirtXml {
    fn serialize(&self, definition: &DomainDefinition) -> Result<Vec<u8>, SerializeError> {
        if definition.name.is_empty() {
            return Err(SerializeError::Invalid("domain name is empty".into()));
        }
        if definition.vcpus == 0 {
            return Err(SerializeError::Invalid("vcpus must be at least 1".into()));
        }
        if definition.memory_mb == 0 {
            return Err(SerializeError::Invalid("memory must be at least 1 MiB".into()));
        }

        let mut xml = String::from("<domain type=\"kvm\">\n");
        xml.push_str(&format!("  <name>{}</name>\n", escape(&definition.name)));
        xml.push_str(&format!(
            "  <memory unit=\"MiB\">{}</memory>\n",
            definition.memory_mb
        ));
        xml.push_str(&format!("  <vcpu>{}</vcpu>\n", definition.vcpus));

        xml.push_str("  <os>\n    <type>hvm</type>\n");
        if let Some(kernel) = &definition.kernel {
            xml.push_str(&format!("    <kernel>{}</kernel>\n", escape(kernel)));
        }
        if let Some(cmdline) = &definition.cmdline {
            xml.push_str(&format!("    <cmdline>{}</cmdline>\n", escape(cmdline)));
        }
        if definition.kernel.is_none() {
            xml.push_str("    <boot dev=\"hd\"/>\n");
        }
        xml.push_str("  </os>\n");

        xml.push_str("  <devices>\n");
        for (index, disk) in definition.disks.iter().enumerate() {
            render_disk(&mut xml, index, disk);
        }
        for nic in &definition.nics {
            render_nic(&mut xml, nic);
        }
        xml.push_str("    <serial type=\"pty\"/>\n    <console type=\"pty\"/>\n");
        xml.push_str("  </devices>\n</domain>\n");

        Ok(xml.into_bytes())
    }
}

fn render_disk(xml: &mut String, index: usize, disk: &DiskConfig) {
    // Block devices (zvols) and image files need different source attributes
    let (kind, attr) = if disk.path.starts_with("/dev/") {
        ("block", "dev")
    } else {
        ("file", "file")
    };
    xml.push_str(&format!("    <disk type=\"{}\" device=\"disk\">\n", kind));
    xml.push_str("      <driver name=\"qemu\" type=\"raw\"/>\n");
    xml.push_str(&format!(
        "      <source {}=\"{}\"/>\n",
        attr,
        escape(&disk.path)
    ));
    xml.push_str(&format!(
        "      <target dev=\"{}\" bus=\"virtio\"/>\n",
        disk_target(index)
    ));
    if disk.readonly {
        xml.push_str("      <readonly/>\n");
    }
    xml.push_str("    </disk>\n");
}

fn render_nic(xml: &mut String, nic: &NicConfig) {
    match &nic.bridge {
        Some(bridge) => {
            xml.push_str("    <interface type=\"bridge\">\n");
            xml.push_str(&format!("      <source bridge=\"{}\"/>\n", escape(bridge)));
        }
        None => {
            xml.push_str("    <interface type=\"network\">\n");
            xml.push_str("      <source network=\"default\"/>\n");
        }
    }
    if let Some(mac) = &nic.mac {
        xml.push_str(&format!("      <mac address=\"{}\"/>\n", escape(mac)));
    }
    xml.push_str("      <model type=\"virtio\"/>\n    </interface>\n");
}

/// virtio disk name for the n-th disk: vda..vdz, vdaa..
fn disk_target(index: usize) -> String {
    let mut suffix = Vec::new();
    let mut n = index;
    loop {
        suffix.push(b'a' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    suffix.reverse();
    format!("vd{}", String::from_utf8_lossy(&suffix))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
