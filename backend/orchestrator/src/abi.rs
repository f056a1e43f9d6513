//! Contract interfaces and call builders.
//!
//! Every chain interaction goes through a [`ContractCall`]: a target address,
//! a human-readable function name for logs, and ABI-encoded calldata.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};

use crate::errors::Result;

sol! {
    interface IERC20 {
        function approve(address spender, uint256 value) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address owner) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

sol! {
    interface ICampaign {
        function createCampaign(string name, string creatorName, uint256 targetAmount) external returns (uint256);
        function donate(uint256 campaignId, uint256 amount, address tokenIn) external;
        function withdraw(uint256 campaignId, uint256 amount) external;
        function getCampaignInfo(uint256 campaignId) external view returns (
            string name,
            string creatorName,
            uint256 balance,
            uint256 targetAmount,
            uint256 creationTime,
            address owner
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    pub function: &'static str,
    pub data: Bytes,
}

impl ContractCall {
    fn new<C: SolCall>(to: Address, call: C) -> Self {
        ContractCall {
            to,
            function: C::SIGNATURE,
            data: Bytes::from(call.abi_encode()),
        }
    }

    /// Bare function name, e.g. `approve`.
    pub fn name(&self) -> &'static str {
        self.function.split('(').next().unwrap_or(self.function)
    }
}

// ─────────────────────────────────────────────────────────
// ERC-20
// ─────────────────────────────────────────────────────────

pub fn approve(token: Address, spender: Address, value: U256) -> ContractCall {
    ContractCall::new(token, IERC20::approveCall { spender, value })
}

pub fn allowance(token: Address, owner: Address, spender: Address) -> ContractCall {
    ContractCall::new(token, IERC20::allowanceCall { owner, spender })
}

pub fn balance_of(token: Address, owner: Address) -> ContractCall {
    ContractCall::new(token, IERC20::balanceOfCall { owner })
}

pub fn decimals(token: Address) -> ContractCall {
    ContractCall::new(token, IERC20::decimalsCall {})
}

// ─────────────────────────────────────────────────────────
// Campaign
// ─────────────────────────────────────────────────────────

pub fn donate(campaign: Address, campaign_id: u64, amount: U256, token: Address) -> ContractCall {
    ContractCall::new(
        campaign,
        ICampaign::donateCall {
            campaignId: U256::from(campaign_id),
            amount,
            tokenIn: token,
        },
    )
}

pub fn withdraw(campaign: Address, campaign_id: u64, amount: U256) -> ContractCall {
    ContractCall::new(
        campaign,
        ICampaign::withdrawCall {
            campaignId: U256::from(campaign_id),
            amount,
        },
    )
}

pub fn create_campaign(
    campaign: Address,
    name: String,
    creator_name: String,
    target_amount: U256,
) -> ContractCall {
    ContractCall::new(
        campaign,
        ICampaign::createCampaignCall {
            name,
            creatorName: creator_name,
            targetAmount: target_amount,
        },
    )
}

pub fn campaign_info(campaign: Address, campaign_id: u64) -> ContractCall {
    ContractCall::new(
        campaign,
        ICampaign::getCampaignInfoCall {
            campaignId: U256::from(campaign_id),
        },
    )
}

// ─────────────────────────────────────────────────────────
// Return decoding
// ─────────────────────────────────────────────────────────

pub fn decode_uint(data: &[u8]) -> Result<U256> {
    Ok(IERC20::allowanceCall::abi_decode_returns(data, true)?._0)
}

pub fn decode_decimals(data: &[u8]) -> Result<u8> {
    Ok(IERC20::decimalsCall::abi_decode_returns(data, true)?._0)
}

/// On-chain view of a campaign, as returned by `getCampaignInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignInfo {
    pub name: String,
    pub creator_name: String,
    pub balance: U256,
    pub target_amount: U256,
    pub owner: Address,
}

pub fn decode_campaign_info(data: &[u8]) -> Result<CampaignInfo> {
    let ret = ICampaign::getCampaignInfoCall::abi_decode_returns(data, true)?;
    Ok(CampaignInfo {
        name: ret.name,
        creator_name: ret.creatorName,
        balance: ret.balance,
        target_amount: ret.targetAmount,
        owner: ret.owner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn erc20_selectors() {
        assert_eq!(approve(addr(1), addr(2), U256::MAX).data[..4], [0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(allowance(addr(1), addr(2), addr(3)).data[..4], [0xdd, 0x62, 0xed, 0x3e]);
        assert_eq!(balance_of(addr(1), addr(2)).data[..4], [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(decimals(addr(1)).data[..], [0x31, 0x3c, 0xe5, 0x67]);
    }

    #[test]
    fn approve_encodes_spender_and_max() {
        let call = approve(addr(0xaa), addr(0xbb), U256::MAX);
        assert_eq!(call.to, addr(0xaa));
        assert_eq!(call.name(), "approve");
        assert_eq!(call.data.len(), 4 + 32 + 32);
        assert_eq!(&call.data[4 + 12..4 + 32], addr(0xbb).as_slice());
        assert!(call.data[36..].iter().all(|b| *b == 0xff));
    }

    #[test]
    fn donate_round_trips_arguments() {
        let call = donate(addr(0xcc), 42, U256::from(10_000u64), addr(0xaa));
        assert_eq!(call.function, "donate(uint256,uint256,address)");
        let decoded = ICampaign::donateCall::abi_decode(&call.data, true).unwrap();
        assert_eq!(decoded.campaignId, U256::from(42u64));
        assert_eq!(decoded.amount, U256::from(10_000u64));
        assert_eq!(decoded.tokenIn, addr(0xaa));
    }

    #[test]
    fn decodes_uint_return() {
        let mut word = [0u8; 32];
        word[31] = 7;
        assert_eq!(decode_uint(&word).unwrap(), U256::from(7u64));
        assert!(decode_uint(&[0u8; 3]).is_err());
    }

    #[test]
    fn decodes_campaign_info() {
        let encoded = ICampaign::getCampaignInfoCall::abi_encode_returns(&(
            "Clean Water".to_string(),
            "Ayu".to_string(),
            U256::from(5_000u64),
            U256::from(100_000u64),
            U256::from(1_700_000_000u64),
            addr(0x11),
        ));
        let info = decode_campaign_info(&encoded).unwrap();
        assert_eq!(info.name, "Clean Water");
        assert_eq!(info.balance, U256::from(5_000u64));
        assert_eq!(info.owner, addr(0x11));
    }
}
