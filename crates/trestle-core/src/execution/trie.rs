use crate::execution::proof::path_nibbles;
use crate::types::{keccak256, Hash256, Receipt};
use alloy_rlp::Encodable;

/// Root of an empty Merkle-Patricia trie: keccak256 of the empty RLP string.
pub const EMPTY_TRIE_ROOT: Hash256 = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
];

/// An in-memory Merkle-Patricia trie.
///
/// Used to rebuild a block's receipts trie so its root can be checked against
/// the header's declared receipts root, and to extract honest proof-node sets.
/// This is a construction-side structure only; untrusted proofs are verified
/// by [`crate::execution::proof::verify_trie_proof`] without ever building a
/// trie.
#[derive(Debug, Default)]
pub struct Trie {
    root: Node,
}

#[derive(Debug, Default)]
enum Node {
    #[default]
    Empty,
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Extension {
        path: Vec<u8>,
        child: Box<Node>,
    },
    Branch {
        children: Box<[Node; 16]>,
        value: Option<Vec<u8>>,
    },
}

impl Trie {
    /// An empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the receipts trie of a block: keys are the RLP-encoded
    /// transaction indices, values the canonical receipt encodings.
    pub fn from_receipts(receipts: &[Receipt]) -> Self {
        let mut trie = Self::new();
        for (index, receipt) in receipts.iter().enumerate() {
            trie.insert(&alloy_rlp::encode(index as u64), receipt.encoded());
        }
        trie
    }

    /// Insert `value` under `key`, replacing any previous value.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) {
        let nibbles = path_nibbles(key);
        let root = std::mem::take(&mut self.root);
        self.root = insert_node(root, &nibbles, value);
    }

    /// Value stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let nibbles = path_nibbles(key);
        get_node(&self.root, &nibbles)
    }

    /// Root hash of the trie.
    pub fn root_hash(&self) -> Hash256 {
        match self.root {
            Node::Empty => EMPTY_TRIE_ROOT,
            _ => keccak256(&encode_node(&self.root)),
        }
    }

    /// Proof-node set for `key`, ordered root-first: every node on the path
    /// whose encoding is referenced by hash. Embedded sub-nodes travel inside
    /// their parent's encoding and are not listed separately.
    pub fn prove(&self, key: &[u8]) -> Vec<Vec<u8>> {
        let nibbles = path_nibbles(key);
        let mut proof = Vec::new();
        if matches!(self.root, Node::Empty) {
            return proof;
        }
        proof.push(encode_node(&self.root));
        collect_proof(&self.root, &nibbles, &mut proof);
        proof
    }
}

fn insert_node(node: Node, path: &[u8], value: Vec<u8>) -> Node {
    match node {
        Node::Empty => Node::Leaf {
            path: path.to_vec(),
            value,
        },
        Node::Leaf {
            path: leaf_path,
            value: leaf_value,
        } => {
            if leaf_path == path {
                return Node::Leaf {
                    path: leaf_path,
                    value,
                };
            }
            let common = common_prefix_len(&leaf_path, path);
            let mut children: Box<[Node; 16]> = Box::new(std::array::from_fn(|_| Node::Empty));
            let mut branch_value = None;
            attach(
                &mut children,
                &mut branch_value,
                &leaf_path[common..],
                leaf_value,
            );
            attach(&mut children, &mut branch_value, &path[common..], value);
            wrap_extension(
                &path[..common],
                Node::Branch {
                    children,
                    value: branch_value,
                },
            )
        }
        Node::Extension {
            path: ext_path,
            child,
        } => {
            let common = common_prefix_len(&ext_path, path);
            if common == ext_path.len() {
                return Node::Extension {
                    path: ext_path,
                    child: Box::new(insert_node(*child, &path[common..], value)),
                };
            }
            // Split the extension at the divergence point.
            let mut children: Box<[Node; 16]> = Box::new(std::array::from_fn(|_| Node::Empty));
            let mut branch_value = None;
            let ext_remainder = &ext_path[common + 1..];
            children[ext_path[common] as usize] = if ext_remainder.is_empty() {
                *child
            } else {
                Node::Extension {
                    path: ext_remainder.to_vec(),
                    child,
                }
            };
            attach(&mut children, &mut branch_value, &path[common..], value);
            wrap_extension(
                &path[..common],
                Node::Branch {
                    children,
                    value: branch_value,
                },
            )
        }
        Node::Branch {
            mut children,
            value: branch_value,
        } => {
            if path.is_empty() {
                return Node::Branch {
                    children,
                    value: Some(value),
                };
            }
            let index = path[0] as usize;
            let child = std::mem::take(&mut children[index]);
            children[index] = insert_node(child, &path[1..], value);
            Node::Branch {
                children,
                value: branch_value,
            }
        }
    }
}

/// Hang `value` off a fresh branch: either as the branch value (path
/// exhausted) or as a leaf under the first remaining nibble.
fn attach(
    children: &mut [Node; 16],
    branch_value: &mut Option<Vec<u8>>,
    remainder: &[u8],
    value: Vec<u8>,
) {
    if remainder.is_empty() {
        *branch_value = Some(value);
    } else {
        children[remainder[0] as usize] = Node::Leaf {
            path: remainder[1..].to_vec(),
            value,
        };
    }
}

fn wrap_extension(prefix: &[u8], node: Node) -> Node {
    if prefix.is_empty() {
        node
    } else {
        Node::Extension {
            path: prefix.to_vec(),
            child: Box::new(node),
        }
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn get_node<'a>(node: &'a Node, path: &[u8]) -> Option<&'a [u8]> {
    match node {
        Node::Empty => None,
        Node::Leaf {
            path: leaf_path,
            value,
        } => (leaf_path.as_slice() == path).then_some(value.as_slice()),
        Node::Extension {
            path: ext_path,
            child,
        } => path
            .strip_prefix(ext_path.as_slice())
            .and_then(|rest| get_node(child, rest)),
        Node::Branch { children, value } => {
            if path.is_empty() {
                value.as_deref()
            } else {
                get_node(&children[path[0] as usize], &path[1..])
            }
        }
    }
}

/// Raw RLP encoding of a node.
fn encode_node(node: &Node) -> Vec<u8> {
    match node {
        Node::Empty => vec![0x80],
        Node::Leaf { path, value } => {
            encode_list(&[encode_string(&compact_encode(path, true)), encode_string(value)])
        }
        Node::Extension { path, child } => encode_list(&[
            encode_string(&compact_encode(path, false)),
            child_ref(child),
        ]),
        Node::Branch { children, value } => {
            let mut items = Vec::with_capacity(17);
            for child in children.iter() {
                items.push(match child {
                    Node::Empty => vec![0x80],
                    _ => child_ref(child),
                });
            }
            items.push(match value {
                Some(v) => encode_string(v),
                None => vec![0x80],
            });
            encode_list(&items)
        }
    }
}

/// Reference to a child inside its parent's encoding: nodes shorter than a
/// hash are embedded verbatim, all others by their keccak256 hash.
fn child_ref(child: &Node) -> Vec<u8> {
    let encoding = encode_node(child);
    if encoding.len() < 32 {
        encoding
    } else {
        encode_string(&keccak256(&encoding))
    }
}

fn encode_string(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 4);
    bytes.encode(&mut out);
    out
}

fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_length: usize = items.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(payload_length + 4);
    alloy_rlp::Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

/// Compact (hex-prefix) encoding of a nibble path.
fn compact_encode(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
    let flag: u8 = if is_leaf { 2 } else { 0 };
    let mut out;
    if nibbles.len() % 2 == 1 {
        out = Vec::with_capacity(nibbles.len() / 2 + 1);
        out.push(((flag + 1) << 4) | nibbles[0]);
        for pair in nibbles[1..].chunks(2) {
            out.push((pair[0] << 4) | pair[1]);
        }
    } else {
        out = Vec::with_capacity(nibbles.len() / 2 + 1);
        out.push(flag << 4);
        for pair in nibbles.chunks(2) {
            out.push((pair[0] << 4) | pair[1]);
        }
    }
    out
}

/// Walk the path, appending every hash-referenced node encoding to `proof`.
fn collect_proof(node: &Node, path: &[u8], proof: &mut Vec<Vec<u8>>) {
    let child = match node {
        Node::Empty | Node::Leaf { .. } => return,
        Node::Extension {
            path: ext_path,
            child,
        } => match path.strip_prefix(ext_path.as_slice()) {
            Some(rest) => (child.as_ref(), rest),
            None => return,
        },
        Node::Branch { children, .. } => {
            if path.is_empty() {
                return;
            }
            (&children[path[0] as usize], &path[1..])
        }
    };
    let (child_node, rest) = child;
    if matches!(child_node, Node::Empty) {
        return;
    }
    let encoding = encode_node(child_node);
    if encoding.len() >= 32 {
        proof.push(encoding);
    }
    collect_proof(child_node, rest, proof);
}
