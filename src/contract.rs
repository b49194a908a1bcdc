//! Admin surface of the deployed BulkSend contract.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

use crate::chain::DeployError;

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IBulkSendAdmin {
        function owner() external view returns (address);
        function pendingOwner() external view returns (address);
        function transferOwnership(address newOwner) external;
        function acceptOwnership() external;
        function withdrawStuckNative(address to) external;
        function withdrawStuckToken(address token, address to) external;
        function withdrawStuckERC721(address token, address to, uint256 tokenId) external;
        function withdrawStuckERC1155(address token, address to, uint256 tokenId, uint256 amount) external;
    }
}

pub fn transfer_ownership(new_owner: Address) -> Bytes {
    IBulkSendAdmin::transferOwnershipCall { newOwner: new_owner }.abi_encode().into()
}

pub fn accept_ownership() -> Bytes {
    IBulkSendAdmin::acceptOwnershipCall {}.abi_encode().into()
}

pub fn pending_owner() -> Bytes {
    IBulkSendAdmin::pendingOwnerCall {}.abi_encode().into()
}

pub fn decode_pending_owner(data: &[u8]) -> Result<Address, DeployError> {
    IBulkSendAdmin::pendingOwnerCall::abi_decode_returns(data)
        .map_err(|e| DeployError::Rpc(format!("cannot decode pendingOwner(): {e}")))
}

pub fn withdraw_stuck_native(to: Address) -> Bytes {
    IBulkSendAdmin::withdrawStuckNativeCall { to }.abi_encode().into()
}

pub fn withdraw_stuck_token(token: Address, to: Address) -> Bytes {
    IBulkSendAdmin::withdrawStuckTokenCall { token, to }.abi_encode().into()
}

pub fn withdraw_stuck_erc721(token: Address, to: Address, token_id: U256) -> Bytes {
    IBulkSendAdmin::withdrawStuckERC721Call { token, to, tokenId: token_id }
        .abi_encode()
        .into()
}

pub fn withdraw_stuck_erc1155(token: Address, to: Address, token_id: U256, amount: U256) -> Bytes {
    IBulkSendAdmin::withdrawStuckERC1155Call {
        token,
        to,
        tokenId: token_id,
        amount,
    }
    .abi_encode()
    .into()
}
